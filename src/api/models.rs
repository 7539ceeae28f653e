//! API data models

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::movement::DetectionResult;
use crate::render::{clip_file_name, job_clip_path};

const DOWNLOAD_ROUTE: &str = "/api/download/";

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub video_id: String,
}

/// Body of `POST /api/process`
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessingRequest {
    pub video_id: String,
    /// Movements to look for; empty means the configured vocabulary
    #[serde(default)]
    pub movements: Vec<String>,
}

/// A detected window plus the path of its GIF, relative to the clips dir
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipSegment {
    pub start_time: f64,
    pub end_time: f64,
    pub description: String,
    pub similarity_score: u8,
    pub gif_path: String,
}

/// Response of `POST /api/process`. `movements` keeps vocabulary order.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResponse {
    pub video_id: String,
    #[serde(serialize_with = "serialize_ordered")]
    pub movements: Vec<(String, Vec<ClipSegment>)>,
}

impl ProcessingResponse {
    /// Attach the GIF file name to every window
    pub fn from_detection(video_id: &str, result: &DetectionResult) -> Self {
        let movements = result
            .iter()
            .enumerate()
            .map(|(i, (movement, windows))| {
                let clips = windows
                    .iter()
                    .enumerate()
                    .map(|(j, window)| ClipSegment {
                        start_time: window.start_time,
                        end_time: window.end_time,
                        description: window.description.clone(),
                        similarity_score: window.similarity_score,
                        gif_path: job_clip_path(video_id, &clip_file_name(i + 1, movement, j + 1)),
                    })
                    .collect();
                (movement.to_string(), clips)
            })
            .collect();

        Self {
            video_id: video_id.to_string(),
            movements,
        }
    }
}

fn serialize_ordered<S: Serializer>(
    entries: &[(String, Vec<ClipSegment>)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (movement, clips) in entries {
        map.serialize_entry(movement, clips)?;
    }
    map.end()
}

/// Query string of `GET /api/download/*path`
#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

/// One entry of `POST /api/download-selected`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GifDownloadRequest {
    /// Clip URL, or a clip path relative to the clips dir
    pub url: String,
    pub start: Option<f64>,
    pub end: Option<f64>,
}

impl GifDownloadRequest {
    /// Clip path the URL points at, relative to the clips dir and without
    /// query string
    pub fn clip_path(&self) -> &str {
        let path = self.url.split('?').next().unwrap_or_default();
        match path.find(DOWNLOAD_ROUTE) {
            Some(at) => &path[at + DOWNLOAD_ROUTE.len()..],
            None => path,
        }
    }

    pub fn trim_bounds(&self) -> Option<(f64, f64)> {
        self.start.zip(self.end)
    }
}
