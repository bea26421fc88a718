mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "drew")]
#[command(about = "宣言したステージを、コンテナの中で。", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// ステージを実行
    Run {
        /// ステージファイル (JSON または YAML)
        stage_file: PathBuf,
        /// フォーミュラ名（フォーミュラディレクトリからの相対パス）
        #[arg(short, long, default_value = ".")]
        formula: String,
        /// フォーミュラディレクトリ（省略時はカレントディレクトリ）
        #[arg(long, env = "DREW_FORMULAS_DIR")]
        formulas_dir: Option<PathBuf>,
        /// テンプレート変数 (KEY=VALUE)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
        /// 出力をJSONで表示
        #[arg(long)]
        json: bool,
    },
    /// ステージファイルを検証
    Validate {
        /// ステージファイル (JSON または YAML)
        stage_file: PathBuf,
    },
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ログはstderrへ（stdoutはコンテナ出力と結果に使う）
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match cli.command {
        Commands::Version => {
            println!("drew {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Validate { stage_file } => commands::validate::handle(&stage_file),
        Commands::Run {
            stage_file,
            formula,
            formulas_dir,
            vars,
            json,
        } => {
            let formulas_dir = match formulas_dir {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            commands::run::handle(commands::run::RunOptions {
                stage_file,
                formula,
                formulas_dir,
                vars,
                json,
            })
            .await
        }
    }
}
