use colored::Colorize;
use drew_core::{ExtractRule, load_stage_file};
use std::path::Path;

pub fn handle(stage_file: &Path) -> anyhow::Result<()> {
    println!("{}", "ステージを検証中...".blue());

    let stage = match load_stage_file(stage_file) {
        Ok(stage) => stage,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ ステージファイルを読み込めません".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };

    println!("イメージ: {}", stage.image.cyan());
    println!(
        "モード: {}",
        if stage.interactive {
            "対話"
        } else {
            "ヘッドレス"
        }
    );
    println!("出力: {}個", stage.outputs.len());
    for output in &stage.outputs {
        let rule = match &output.extract {
            None => "(未使用)".dimmed().to_string(),
            Some(ExtractRule::Stdout) => "stdout".to_string(),
            Some(ExtractRule::Stderr) => "stderr".to_string(),
            Some(ExtractRule::Regex {
                expr, group_name, ..
            }) => format!("regex {} → {}", expr, group_name),
        };
        println!("    - {} ({})", output.id.cyan(), rule);
    }

    if stage.interactive && stage.dind {
        println!("{}", "⚠ dind は対話モードでは無視されます".yellow());
    }

    let issues = stage.validate();
    if issues.is_empty() {
        println!("{}", "✓ ステージ定義は正常です！".green().bold());
        return Ok(());
    }

    eprintln!();
    eprintln!("{}", "✗ ステージ定義エラー".red().bold());
    for issue in &issues {
        eprintln!("  • {}", issue);
    }
    std::process::exit(1);
}
