use std::path::PathBuf;
use thiserror::Error;

/// 出力抽出の失敗理由
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionFailure {
    #[error("正規表現をコンパイルできません: \"{pattern}\"\n理由: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("正規表現 \"{pattern}\" にマッチする出力がありません")]
    NoMatch { pattern: String },

    #[error("正規表現 \"{pattern}\" に名前付きグループ '{group}' がありません")]
    MissingGroup { pattern: String, group: String },

    #[error("名前付きグループ '{group}' はマッチに参加しませんでした（正規表現: \"{pattern}\"）")]
    EmptyCapture { pattern: String, group: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("出力 '{output_id}' に抽出ルールが指定されていません")]
    MissingSpec { output_id: String },

    #[error("出力 '{output_id}' の抽出に失敗しました: {failure}")]
    Failed {
        output_id: String,
        failure: ExtractionFailure,
    },
}

impl ExtractError {
    /// 失敗した出力ID
    pub fn output_id(&self) -> &str {
        match self {
            ExtractError::MissingSpec { output_id } | ExtractError::Failed { output_id, .. } => {
                output_id
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum StageFileError {
    #[error("ステージファイルを読み込めません: {path}\n理由: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ステージファイルのJSONパースエラー: {path}\n理由: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("ステージファイルのYAMLパースエラー: {path}\n理由: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// ステージ定義の検証で見つかった問題
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageIssue {
    #[error("出力ID '{0}' が重複しています")]
    DuplicateOutput(String),

    #[error("出力 '{output_id}' の正規表現が不正です: {message}")]
    InvalidPattern { output_id: String, message: String },
}

impl StageIssue {
    /// 実行前に必ず拒否すべき問題か
    ///
    /// 正規表現の不正は抽出時に `ExtractionFailure::InvalidPattern` として扱う。
    pub fn is_fatal(&self) -> bool {
        matches!(self, StageIssue::DuplicateOutput(_))
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
