//! モデル定義
//!
//! 外部インタプリタとやり取りするステージ命令と出力のデータモデル。

mod output;
mod stage;

// Re-exports
pub use output::*;
pub use stage::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageIssue;

    #[test]
    fn test_stage_from_json() {
        let json = r#"{
            "image": "alpine:3.19",
            "cmd": ["sh", "-c", "echo {{ greeting }}"],
            "envs": {"TOKEN": "{{ token }}"},
            "workdir": "{{ workdir }}",
            "outputs": [
                {"id": "all", "extract": {"type": "stdout"}},
                {"id": "unused"},
                {"id": "build", "extract": {"type": "regex", "expr": "ID=(?<val>\\w+)", "groupName": "val", "stream": "stderr"}}
            ]
        }"#;

        let stage: StageInstruction = serde_json::from_str(json).unwrap();

        assert_eq!(stage.image, "alpine:3.19");
        assert_eq!(stage.cmd.len(), 3);
        assert_eq!(stage.envs.get("TOKEN"), Some(&"{{ token }}".to_string()));
        assert!(!stage.interactive);
        assert!(!stage.dind);
        assert_eq!(stage.outputs.len(), 3);
        assert!(matches!(stage.outputs[0].extract, Some(ExtractRule::Stdout)));
        assert!(stage.outputs[1].extract.is_none());

        match &stage.outputs[2].extract {
            Some(ExtractRule::Regex {
                expr,
                group_name,
                stream,
            }) => {
                assert_eq!(expr.as_str(), r"ID=(?<val>\w+)");
                assert_eq!(group_name, "val");
                assert_eq!(*stream, ExtractStream::Stderr);
            }
            other => panic!("unexpected rule: {:?}", other),
        }
    }

    #[test]
    fn test_regex_stream_defaults_to_stdout() {
        let json = r#"{"type": "regex", "expr": "v=(?<v>.+)", "groupName": "v"}"#;
        let rule: ExtractRule = serde_json::from_str(json).unwrap();

        match rule {
            ExtractRule::Regex { stream, .. } => assert_eq!(stream, ExtractStream::Stdout),
            other => panic!("unexpected rule: {:?}", other),
        }
    }

    #[test]
    fn test_stage_from_yaml_with_flags() {
        let yaml = r#"
image: docker:cli
cmd: ["docker", "ps"]
workdir: /work
interactive: false
dind: true
"#;
        let stage: StageInstruction = serde_yaml::from_str(yaml).unwrap();

        assert!(stage.dind);
        assert!(stage.outputs.is_empty());
        assert!(!stage.expects_outputs());
    }

    #[test]
    fn test_expects_outputs_ignores_declared_only() {
        let mut stage = StageInstruction::new("alpine", "/work");
        stage.outputs.push(OutputSpec::declared("later"));
        assert!(!stage.expects_outputs());

        stage.outputs.push(OutputSpec::new("out", ExtractRule::Stdout));
        assert!(stage.expects_outputs());
    }

    #[test]
    fn test_validate_reports_duplicates_and_bad_patterns() {
        let mut stage = StageInstruction::new("alpine", "/work");
        stage.outputs = vec![
            OutputSpec::new("a", ExtractRule::Stdout),
            OutputSpec::new("a", ExtractRule::Stderr),
            OutputSpec::new("b", ExtractRule::regex("(?<x>unclosed", "x")),
        ];

        let issues = stage.validate();

        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0], StageIssue::DuplicateOutput("a".to_string()));
        assert!(issues[0].is_fatal());
        assert!(matches!(
            &issues[1],
            StageIssue::InvalidPattern { output_id, .. } if output_id == "b"
        ));
        assert!(!issues[1].is_fatal());
    }

    #[test]
    fn test_validate_allows_duplicate_declared_only_outputs() {
        let mut stage = StageInstruction::new("alpine", "/work");
        stage.outputs = vec![
            OutputSpec::declared("a"),
            OutputSpec::new("a", ExtractRule::Stdout),
        ];

        assert!(stage.validate().is_empty());
    }

    #[test]
    fn test_regex_expr_serializes_as_pattern() {
        let rule = ExtractRule::regex(regex::Regex::new(r"v=(?<v>\d+)").unwrap(), "v");
        let json = serde_json::to_value(&rule).unwrap();

        assert_eq!(json["type"], "regex");
        assert_eq!(json["expr"], r"v=(?<v>\d+)");
        assert_eq!(json["groupName"], "v");
        assert_eq!(json["stream"], "stdout");
    }
}
