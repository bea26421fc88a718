//! 変数解決
//!
//! ステージのコマンド引数・環境変数・作業ディレクトリに含まれる変数参照を、
//! コンテナ起動直前に値へ解決する。解決時のエラーはそのまま呼び出し元へ返す。

use anyhow::Context as _;
use std::collections::HashMap;
use tera::{Context, Tera};
use tracing::{debug, info};

/// 変数解決のインターフェース
pub trait StateStorage: Send + Sync {
    /// テンプレート文字列を値に解決
    fn to_value(&self, template: &str) -> anyhow::Result<String>;
}

impl<F> StateStorage for F
where
    F: Fn(&str) -> anyhow::Result<String> + Send + Sync,
{
    fn to_value(&self, template: &str) -> anyhow::Result<String> {
        self(template)
    }
}

/// Teraテンプレートで変数を解決する実装
#[derive(Debug, Clone, Default)]
pub struct TemplateState {
    context: Context,
}

impl TemplateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 変数を追加
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        let value: serde_json::Value = value.into();
        self.context.insert(key.into(), &value);
    }

    /// 複数の変数を追加
    pub fn extend(&mut self, variables: HashMap<String, String>) {
        for (key, value) in variables {
            self.context.insert(key, &value);
        }
    }

    /// 指定プレフィックスの環境変数を追加
    ///
    /// ホストの環境変数をすべて公開しないよう、プレフィックスで絞り込む。
    #[tracing::instrument(skip(self))]
    pub fn add_env_variables(&mut self, prefix: &str) {
        let mut count = 0;

        for (key, value) in std::env::vars() {
            if key.starts_with(prefix) {
                debug!(key = %key, "Adding environment variable");
                self.context.insert(key, &value);
                count += 1;
            }
        }

        info!(env_var_count = count, "Added filtered environment variables");
    }
}

impl StateStorage for TemplateState {
    fn to_value(&self, template: &str) -> anyhow::Result<String> {
        // 変数参照を含まない値はそのまま返す
        if !template.contains("{{") && !template.contains("{%") {
            return Ok(template.to_string());
        }

        Tera::one_off(template, &self.context, false)
            .with_context(|| format!("テンプレート '{}' を展開できません", template))
    }
}

/// `KEY=VALUE` 形式の変数指定をパース
pub fn parse_variable(spec: &str) -> anyhow::Result<(String, String)> {
    let (key, value) = spec
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("変数は KEY=VALUE 形式で指定してください: {}", spec))?;

    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("変数名が空です: {}", spec);
    }

    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_variable_expansion() {
        let mut state = TemplateState::new();
        state.set("name", "world");

        assert_eq!(state.to_value("Hello {{ name }}!").unwrap(), "Hello world!");
    }

    #[test]
    fn test_plain_value_is_returned_unchanged() {
        let state = TemplateState::new();
        assert_eq!(state.to_value("echo hi").unwrap(), "echo hi");
    }

    #[test]
    fn test_filters_are_available() {
        let mut state = TemplateState::new();
        state.set("name", "HELLO");

        assert_eq!(state.to_value("{{ name | lower }}").unwrap(), "hello");
    }

    #[test]
    fn test_html_is_not_escaped() {
        let mut state = TemplateState::new();
        state.set("url", "https://example.com/?a=1&b=<2>");

        assert_eq!(
            state.to_value("{{ url }}").unwrap(),
            "https://example.com/?a=1&b=<2>"
        );
    }

    #[test]
    fn test_undefined_variable_is_an_error() {
        let state = TemplateState::new();
        let err = state.to_value("{{ missing }}").unwrap_err();

        assert!(err.to_string().contains("{{ missing }}"));
    }

    #[test]
    fn test_extend_variables() {
        let mut state = TemplateState::new();
        state.extend(HashMap::from([
            ("project".to_string(), "myapp".to_string()),
            ("env".to_string(), "prod".to_string()),
        ]));

        assert_eq!(
            state.to_value("{{ project }}:{{ env }}").unwrap(),
            "myapp:prod"
        );
    }

    #[test]
    fn test_closure_is_a_state_storage() {
        let resolver = |template: &str| -> anyhow::Result<String> { Ok(template.to_uppercase()) };
        assert_eq!(resolver.to_value("abc").unwrap(), "ABC");
    }

    #[test]
    fn test_parse_variable() {
        assert_eq!(
            parse_variable("TOKEN=a=b").unwrap(),
            ("TOKEN".to_string(), "a=b".to_string())
        );
        assert!(parse_variable("TOKEN").is_err());
        assert!(parse_variable("=value").is_err());
    }
}
