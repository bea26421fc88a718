//! ステージファイルのローダー
//!
//! 拡張子が `.yaml` / `.yml` ならYAML、それ以外はJSONとして読み込む。

use crate::error::StageFileError;
use crate::model::StageInstruction;
use std::path::Path;
use tracing::{debug, instrument};

#[instrument(skip(path), fields(path = %path.display()))]
pub fn load_stage_file(path: &Path) -> Result<StageInstruction, StageFileError> {
    let content = std::fs::read_to_string(path).map_err(|source| StageFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let stage = parse_stage(path, &content)?;
    debug!(image = %stage.image, outputs = stage.outputs.len(), "Loaded stage instruction");
    Ok(stage)
}

fn parse_stage(path: &Path, content: &str) -> Result<StageInstruction, StageFileError> {
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    if is_yaml {
        serde_yaml::from_str(content).map_err(|source| StageFileError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    } else {
        serde_json::from_str(content).map_err(|source| StageFileError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}
