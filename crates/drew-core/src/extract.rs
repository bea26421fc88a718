//! 出力抽出
//!
//! キャプチャしたstdout/stderrのテキストから、出力宣言の抽出ルールに従って値を取り出す。
//! 抽出は出力ごとに全か無かで、1つでも失敗したらステージの出力は返さない。

use crate::error::{ExtractError, ExtractionFailure, Result};
use crate::model::{ExtractRule, ExtractStream, OutputSpec, RegexExpr, StageOutput};
use regex::{Regex, RegexBuilder};
use std::borrow::Cow;
use tracing::debug;

/// パターン文字列を複数行モードでコンパイル
pub fn compile_pattern(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).multi_line(true).build()
}

/// 1つの出力を抽出
pub fn extract(stdout: &str, stderr: &str, spec: &OutputSpec) -> Result<String> {
    let rule = spec.extract.as_ref().ok_or_else(|| ExtractError::MissingSpec {
        output_id: spec.id.clone(),
    })?;

    match rule {
        ExtractRule::Stdout => Ok(stdout.to_string()),
        ExtractRule::Stderr => Ok(stderr.to_string()),
        ExtractRule::Regex {
            expr,
            group_name,
            stream,
        } => {
            let haystack = match stream {
                ExtractStream::Stdout => stdout,
                ExtractStream::Stderr => stderr,
            };
            extract_named_group(haystack, expr, group_name).map_err(|failure| {
                ExtractError::Failed {
                    output_id: spec.id.clone(),
                    failure,
                }
            })
        }
    }
}

/// 抽出ルールを持つ出力をすべて宣言順に抽出
///
/// 抽出ルールのない出力はスキップする。
pub fn collect_outputs(
    stdout: &str,
    stderr: &str,
    outputs: &[OutputSpec],
) -> Result<Vec<StageOutput>> {
    outputs
        .iter()
        .filter(|o| o.extract.is_some())
        .map(|o| {
            let value = extract(stdout, stderr, o)?;
            debug!(output = %o.id, bytes = value.len(), "Extracted stage output");
            Ok(StageOutput {
                id: o.id.clone(),
                value,
            })
        })
        .collect()
}

fn extract_named_group(
    haystack: &str,
    expr: &RegexExpr,
    group_name: &str,
) -> std::result::Result<String, ExtractionFailure> {
    let regex: Cow<'_, Regex> = match expr {
        RegexExpr::Compiled(regex) => Cow::Borrowed(regex),
        RegexExpr::Pattern(pattern) => {
            Cow::Owned(compile_pattern(pattern).map_err(|e| ExtractionFailure::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?)
        }
    };

    let pattern = regex.as_str();

    let captures = regex
        .captures(haystack)
        .ok_or_else(|| ExtractionFailure::NoMatch {
            pattern: pattern.to_string(),
        })?;

    // グループ名がパターン自体に存在しない場合と、マッチに参加しなかった場合を区別する
    if !regex.capture_names().flatten().any(|name| name == group_name) {
        return Err(ExtractionFailure::MissingGroup {
            pattern: pattern.to_string(),
            group: group_name.to_string(),
        });
    }

    captures
        .name(group_name)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ExtractionFailure::EmptyCapture {
            pattern: pattern.to_string(),
            group: group_name.to_string(),
        })
}
