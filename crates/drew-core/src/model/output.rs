//! 出力定義

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// ステージ出力の宣言
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub id: String,
    /// 抽出ルール（未指定の出力は宣言のみで、結果には含まれない）
    #[serde(default)]
    pub extract: Option<ExtractRule>,
}

impl OutputSpec {
    pub fn new(id: impl Into<String>, extract: ExtractRule) -> Self {
        Self {
            id: id.into(),
            extract: Some(extract),
        }
    }

    /// 抽出ルールなしの出力
    pub fn declared(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            extract: None,
        }
    }
}

/// 抽出ルール
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExtractRule {
    /// 標準出力の全文
    Stdout,
    /// 標準エラー出力の全文
    Stderr,
    /// 正規表現の名前付きグループ
    Regex {
        expr: RegexExpr,
        #[serde(rename = "groupName")]
        group_name: String,
        #[serde(default)]
        stream: ExtractStream,
    },
}

impl ExtractRule {
    pub fn regex(expr: impl Into<RegexExpr>, group_name: impl Into<String>) -> Self {
        ExtractRule::Regex {
            expr: expr.into(),
            group_name: group_name.into(),
            stream: ExtractStream::Stdout,
        }
    }

    pub fn regex_on(
        stream: ExtractStream,
        expr: impl Into<RegexExpr>,
        group_name: impl Into<String>,
    ) -> Self {
        ExtractRule::Regex {
            expr: expr.into(),
            group_name: group_name.into(),
            stream,
        }
    }
}

/// 正規表現ルールの読み取り対象
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractStream {
    #[default]
    Stdout,
    Stderr,
}

/// 正規表現
///
/// ステージファイル由来のパターン文字列は抽出時に複数行モードでコンパイルする。
/// プログラムから渡されたコンパイル済みの正規表現はそのまま使う。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RegexExpr {
    Pattern(String),
    Compiled(Regex),
}

impl RegexExpr {
    /// 元のパターン文字列
    pub fn as_str(&self) -> &str {
        match self {
            RegexExpr::Pattern(pattern) => pattern,
            RegexExpr::Compiled(regex) => regex.as_str(),
        }
    }
}

impl fmt::Display for RegexExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for RegexExpr {
    fn from(pattern: String) -> Self {
        RegexExpr::Pattern(pattern)
    }
}

impl From<&str> for RegexExpr {
    fn from(pattern: &str) -> Self {
        RegexExpr::Pattern(pattern.to_string())
    }
}

impl From<Regex> for RegexExpr {
    fn from(regex: Regex) -> Self {
        RegexExpr::Compiled(regex)
    }
}

impl From<RegexExpr> for String {
    fn from(expr: RegexExpr) -> Self {
        match expr {
            RegexExpr::Pattern(pattern) => pattern,
            RegexExpr::Compiled(regex) => regex.as_str().to_string(),
        }
    }
}

/// 抽出済みのステージ出力
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutput {
    pub id: String,
    pub value: String,
}
