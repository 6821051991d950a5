//! Hands exports to a desktop editor listening on its loopback
//! remote-control port.

use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use tracing::{info, warn};

use crate::api::{ApiRequest, BordersApi};
use crate::error::{EditorError, Result};
use crate::geometry::BBox;
use crate::settings::Settings;
use crate::util::{format_num, normalize_base_url, now_millis};

#[derive(Debug, Clone)]
pub struct RemoteControl {
    client: Client,
    base_url: String,
}

impl RemoteControl {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: normalize_base_url(&settings.remote_control_url),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `url` must stay the last parameter: the editor treats everything
    /// after `url=` as the data address, including its own `&` pairs.
    pub fn import_url(&self, data_url: &str, stamp_ms: i64) -> Result<String> {
        let query = format!(
            "new_layer=true&format=.osm&layer_name=borders_{stamp_ms}&url={data_url}"
        );
        let mut url = Url::parse(&format!("{}/import", self.base_url))
            .map_err(|error| EditorError::invalid(format!("bad remote control url: {error}")))?;
        url.set_query(Some(&query));
        Ok(url.to_string())
    }

    pub fn zoom_url(&self, bbox: BBox) -> Result<String> {
        let params = [
            ("left", format_num(bbox.xmin, 6)),
            ("right", format_num(bbox.xmax, 6)),
            ("bottom", format_num(bbox.ymin, 6)),
            ("top", format_num(bbox.ymax, 6)),
        ];
        Url::parse_with_params(&format!("{}/zoom", self.base_url), params)
            .map(|url| url.to_string())
            .map_err(|error| EditorError::invalid(format!("bad remote control url: {error}")))
    }

    /// Asks the editor to load the export of `request` into a new layer.
    pub fn import(&self, api: &impl BordersApi, request: &ApiRequest) -> Result<String> {
        let data_url = api.url_for(request)?;
        let url = self.import_url(&data_url, now_millis())?;
        self.get(&url)?;
        info!(target: "borders.remote", data_url, "editor import requested");
        Ok(url)
    }

    pub fn zoom(&self, bbox: BBox) -> Result<()> {
        let url = self.zoom_url(bbox)?;
        self.get(&url)
    }

    fn get(&self, url: &str) -> Result<()> {
        let outcome = self.client.get(url).send();
        match outcome {
            Ok(response) if response.status().as_u16() == 200 => Ok(()),
            Ok(response) => {
                warn!(target: "borders.remote", status = %response.status(), "remote control refused");
                Err(remote_control_disabled())
            }
            Err(error) => {
                warn!(target: "borders.remote", %error, "remote control unreachable");
                Err(remote_control_disabled())
            }
        }
    }
}

fn remote_control_disabled() -> EditorError {
    EditorError::exit(
        4,
        "the editor did not accept the request; enable remote control in the editor",
    )
}
