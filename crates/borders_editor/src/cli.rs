use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::json;

use crate::api::{ApiRequest, BordersApi, HttpBordersApi, ServerCapabilities, decode};
use crate::classify::{FilterMode, Thresholds};
use crate::command::Notice;
use crate::error::{EditorError, Result};
use crate::geometry::BBox;
use crate::journal::Journal;
use crate::remote_import::RemoteControl;
use crate::runtime::{RunStats, Runtime};
use crate::script::load_script;
use crate::session::{EditorSession, SessionOptions};
use crate::settings::{DEFAULT_PROFILE, Settings, list_profile_names};
use crate::util::{CliOutput, OutputIntegration, output_for};
use crate::viewport::Viewport;

#[derive(Debug, Parser)]
#[command(
    name = "borders_editor",
    about = "Editing-session client for administrative border datasets",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print server capabilities and derived size thresholds.
    Capabilities(ConnectionArgs),

    /// Sync one viewport and print the cached borders with their colors.
    View(ViewArgs),

    /// Look up a place by name.
    Search(SearchArgs),

    /// Drive a session with a JSON-lines gesture script.
    Replay(ReplayArgs),

    /// Ask the local editor to load the export of a bbox.
    #[command(name = "remote-import")]
    RemoteImport(RemoteImportArgs),

    /// Print built-in settings profile names.
    #[command(name = "list-profiles")]
    ListProfiles,
}

#[derive(Debug, Clone, Args)]
pub struct ConnectionArgs {
    #[arg(long, default_value = DEFAULT_PROFILE)]
    pub profile: String,

    /// `key=value` settings file used instead of a built-in profile.
    #[arg(long)]
    pub settings: Option<PathBuf>,

    #[arg(long = "api-url")]
    pub api_url: Option<String>,

    #[arg(long = "remote-control-url")]
    pub remote_control_url: Option<String>,
}

impl ConnectionArgs {
    fn resolve(&self) -> Result<Settings> {
        let mut settings = Settings::resolve(&self.profile, self.settings.as_deref())?;
        if let Some(api_url) = &self.api_url {
            settings.api_url.clone_from(api_url);
        }
        if let Some(url) = &self.remote_control_url {
            settings.remote_control_url.clone_from(url);
        }
        Ok(settings)
    }
}

#[derive(Debug, Clone, Args)]
pub struct ViewArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// `xmin,ymin,xmax,ymax`
    #[arg(long)]
    pub bbox: BBox,

    #[arg(long, default_value_t = 10.0)]
    pub zoom: f64,

    #[arg(long, value_parser = parse_filter)]
    pub filter: Option<FilterMode>,
}

#[derive(Debug, Clone, Args)]
pub struct SearchArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    pub query: String,
}

#[derive(Debug, Clone, Args)]
pub struct ReplayArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    pub script: PathBuf,

    /// Write a JSON-lines transcript of gestures, requests and notices.
    #[arg(long)]
    pub transcript: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct RemoteImportArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[arg(long)]
    pub bbox: BBox,

    /// Export from this legacy borders table instead of the live one.
    #[arg(long)]
    pub table: Option<String>,

    /// Also move the editor to the bbox.
    #[arg(long)]
    pub zoom: bool,
}

fn parse_filter(raw: &str) -> std::result::Result<FilterMode, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_string())).map_err(|_| {
        let known: Vec<String> = FilterMode::ALL
            .iter()
            .filter_map(|mode| serde_json::to_value(mode).ok())
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect();
        format!("unknown filter {raw}; expected one of {}", known.join(", "))
    })
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Capabilities(args) => run_capabilities(&args),
        Commands::View(args) => run_view(args),
        Commands::Search(args) => run_search(args),
        Commands::Replay(args) => run_replay(args),
        Commands::RemoteImport(args) => run_remote_import(args),
        Commands::ListProfiles => {
            for name in list_profile_names() {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn report_notices(ui: &CliOutput, notices: &[Notice]) {
    for notice in notices {
        match notice {
            Notice::Failure { .. } | Notice::Rejected { .. } => ui.error(&notice.to_string()),
            Notice::Warnings { .. } => ui.warning(&notice.to_string()),
            Notice::FitBounds { .. } => ui.info(&notice.to_string()),
        }
    }
}

fn connect(settings: &Settings) -> Result<Runtime<HttpBordersApi>> {
    let api = HttpBordersApi::new(settings)?;
    Ok(Runtime::new(
        EditorSession::new(SessionOptions::from(settings)),
        api,
    ))
}

fn run_capabilities(args: &ConnectionArgs) -> Result<()> {
    let integration = OutputIntegration::detect();
    let ui = output_for(&integration);
    let settings = args.resolve()?;
    let mut api = HttpBordersApi::new(&settings)?;

    let body = api.call(&ApiRequest::Config)?;
    let capabilities: ServerCapabilities = decode("config", body)?;
    let thresholds =
        Thresholds::from_output_limit_kb(capabilities.mwm_size_thr, settings.bytes_per_node);

    ui.rule(Some("borders_editor capabilities"));
    ui.info(&format!("server={}", api.base_url()));
    ui.info(&format!("readonly={}", capabilities.readonly));
    ui.info(&format!("osm={}", capabilities.osm));
    ui.info(&format!("backup={}", capabilities.backup));
    ui.info(&format!("crossing={}", capabilities.crossing));
    ui.info(&format!(
        "legacy_table={}",
        capabilities.legacy_table().unwrap_or("none")
    ));
    ui.info(&format!(
        "thresholds good={}MB bad={}MB",
        thresholds.good_mb, thresholds.bad_mb
    ));

    if integration.should_emit_json() {
        println!(
            "{}",
            json!({
                "command": "capabilities",
                "status": "ok",
                "server": api.base_url(),
                "readonly": capabilities.readonly,
                "osm": capabilities.osm,
                "backup": capabilities.backup,
                "crossing": capabilities.crossing,
                "legacy_table": capabilities.legacy_table(),
                "good_mb": thresholds.good_mb,
                "bad_mb": thresholds.bad_mb,
                "integration": integration,
            })
        );
    }
    Ok(())
}

fn run_view(args: ViewArgs) -> Result<()> {
    let integration = OutputIntegration::detect();
    let ui = output_for(&integration);
    let settings = args.connection.resolve()?;
    let mut runtime = connect(&settings)?;
    let mut notices: Vec<Notice> = Vec::new();

    runtime.start(&mut notices);
    if let Some(filter) = args.filter {
        runtime.dispatch("filter", |session| Ok(session.set_filter(filter)), &mut notices);
    }
    let viewport = Viewport {
        bbox: args.bbox,
        zoom: args.zoom,
    };
    runtime.dispatch(
        "settle",
        |session| Ok(session.settle_viewport(viewport)),
        &mut notices,
    );
    report_notices(&ui, &notices);

    let session = runtime.session();
    let rows: Vec<_> = session
        .render_order()
        .iter()
        .filter_map(|id| session.cache().get(*id))
        .collect();

    if integration.should_emit_json() {
        let borders: Vec<_> = rows
            .iter()
            .map(|cached| {
                json!({
                    "id": cached.entity.id,
                    "name": cached.entity.name,
                    "admin_level": cached.entity.admin_level,
                    "color": cached.color.to_string(),
                    "stroke": cached.color.css(),
                })
            })
            .collect();
        println!(
            "{}",
            json!({
                "command": "view",
                "status": if notices.is_empty() { "ok" } else { "degraded" },
                "bbox": viewport.bbox.to_string(),
                "zoom": viewport.zoom,
                "filter": session.filter(),
                "borders": borders,
                "notices": notices,
                "integration": integration,
            })
        );
    } else {
        ui.rule(Some("borders"));
        for cached in &rows {
            println!(
                "{}\t{}\t{}",
                cached.entity.id, cached.entity.name, cached.color
            );
        }
        ui.success(&format!("{} borders in view", rows.len()));
    }
    Ok(())
}

fn run_search(args: SearchArgs) -> Result<()> {
    let integration = OutputIntegration::detect();
    let ui = output_for(&integration);
    let settings = args.connection.resolve()?;
    let mut runtime = connect(&settings)?;
    let mut notices: Vec<Notice> = Vec::new();

    let query = args.query.clone();
    runtime.dispatch("search", |session| Ok(session.search(&query)), &mut notices);

    let found = notices.iter().find_map(|notice| match notice {
        Notice::FitBounds { bbox } => Some(*bbox),
        _ => None,
    });
    let failures: Vec<_> = notices
        .iter()
        .filter(|notice| !matches!(notice, Notice::FitBounds { .. }))
        .cloned()
        .collect();
    report_notices(&ui, &failures);

    if integration.should_emit_json() {
        println!(
            "{}",
            json!({
                "command": "search",
                "query": args.query,
                "bounds": found.map(|bbox| bbox.to_string()),
                "notices": failures,
                "integration": integration,
            })
        );
    } else if let Some(bbox) = found {
        println!("{bbox}");
    } else if failures.is_empty() {
        ui.info("nothing found");
    }
    Ok(())
}

fn run_replay(args: ReplayArgs) -> Result<()> {
    let integration = OutputIntegration::detect();
    let ui = output_for(&integration);
    let gestures = load_script(&args.script)?;
    let settings = args.connection.resolve()?;
    let mut runtime = connect(&settings)?;
    let mut journal = Journal::new(args.transcript.clone());

    ui.rule(Some("borders_editor replay"));
    ui.info(&format!("script={}", args.script.display()));
    ui.info(&format!("server={}", runtime.api().base_url()));

    let mut stats = RunStats::default();
    stats.absorb(runtime.start(&mut journal));
    let total = gestures.len();
    for (index, gesture) in gestures.into_iter().enumerate() {
        let label = gesture.label();
        journal.gesture(index, &label);
        stats.absorb(runtime.dispatch(&label, |session| gesture.apply(session), &mut journal));
    }
    let transcript_lines = journal.lines();
    let notices = journal.finish()?;
    report_notices(&ui, &notices);

    let session = runtime.session();
    ui.success(&format!(
        "replayed {total} gestures: {} requests, {} failed, {} notices",
        stats.requests, stats.failed, stats.notices
    ));

    if integration.should_emit_json() {
        println!(
            "{}",
            json!({
                "command": "replay",
                "status": "ok",
                "gestures": total,
                "requests": stats.requests,
                "failed": stats.failed,
                "notices": notices,
                "mode": session.mode_kind(),
                "selected": session.selected(),
                "cached": session.cache().len(),
                "transcript": args.transcript.as_ref().map(|path| path.display().to_string()),
                "transcript_lines": transcript_lines,
                "integration": integration,
            })
        );
    }
    Ok(())
}

fn run_remote_import(args: RemoteImportArgs) -> Result<()> {
    let integration = OutputIntegration::detect();
    let ui = output_for(&integration);
    let settings = args.connection.resolve()?;
    let api = HttpBordersApi::new(&settings)?;
    let remote = RemoteControl::new(&settings)?;

    if args.table.as_deref().is_some_and(|table| table.trim().is_empty()) {
        return Err(EditorError::invalid("--table cannot be empty"));
    }
    let request = ApiRequest::Josm {
        bbox: args.bbox,
        table: args.table.clone(),
    };
    let url = remote.import(&api, &request)?;
    ui.success(&format!("editor import requested: {url}"));
    if args.zoom {
        remote.zoom(args.bbox)?;
        ui.success("editor zoomed to bbox");
    }

    if integration.should_emit_json() {
        println!(
            "{}",
            json!({
                "command": "remote-import",
                "status": "ok",
                "import_url": url,
                "zoomed": args.zoom,
                "integration": integration,
            })
        );
    }
    Ok(())
}
