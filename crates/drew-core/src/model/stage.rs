//! ステージ定義

use super::{ExtractRule, OutputSpec, RegexExpr};
use crate::error::StageIssue;
use crate::extract::compile_pattern;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// 外部インタプリタから渡される、解決済みのステージ命令
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageInstruction {
    /// コンテナイメージ
    pub image: String,
    /// コマンド引数（変数参照を含むテンプレート）
    #[serde(default)]
    pub cmd: Vec<String>,
    /// 環境変数（値はテンプレート）
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    /// `DREW_WORKDIR` として注入される作業ディレクトリのテンプレート
    pub workdir: String,
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    /// 対話モードで実行するか
    #[serde(default)]
    pub interactive: bool,
    /// ホストのDockerソケットをマウントするか（ヘッドレスモードのみ）
    #[serde(default)]
    pub dind: bool,
}

impl StageInstruction {
    pub fn new(image: impl Into<String>, workdir: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            workdir: workdir.into(),
            ..Default::default()
        }
    }

    /// 抽出ルールを持つ出力が宣言されているか
    pub fn expects_outputs(&self) -> bool {
        self.outputs.iter().any(|o| o.extract.is_some())
    }

    /// ステージ定義を検証
    pub fn validate(&self) -> Vec<StageIssue> {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();

        for output in &self.outputs {
            if output.extract.is_some() && !seen.insert(output.id.as_str()) {
                issues.push(StageIssue::DuplicateOutput(output.id.clone()));
            }

            if let Some(ExtractRule::Regex {
                expr: RegexExpr::Pattern(pattern),
                ..
            }) = &output.extract
                && let Err(e) = compile_pattern(pattern)
            {
                issues.push(StageIssue::InvalidPattern {
                    output_id: output.id.clone(),
                    message: e.to_string(),
                });
            }
        }

        issues
    }
}
