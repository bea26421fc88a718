use colored::Colorize;
use drew_config::ExecutorConfig;
use drew_container::{DockerRuntime, HostStreams, MountPolicy, StageError, StageExecutor};
use drew_core::{StageOutput, TemplateState, load_stage_file, parse_variable};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// テンプレート変数として公開する環境変数のプレフィックス
const ENV_PREFIX: &str = "DREW_";

pub struct RunOptions {
    pub stage_file: PathBuf,
    pub formula: String,
    pub formulas_dir: PathBuf,
    pub vars: Vec<String>,
    pub json: bool,
}

pub async fn handle(opts: RunOptions) -> anyhow::Result<()> {
    let stage = load_stage_file(&opts.stage_file)?;
    info!(
        stage_file = %opts.stage_file.display(),
        formula = %opts.formula,
        image = %stage.image,
        interactive = stage.interactive,
        "Loaded stage"
    );
    let config = ExecutorConfig::load()?;

    let mut state = TemplateState::new();
    state.add_env_variables(ENV_PREFIX);
    for var in &opts.vars {
        let (key, value) = parse_variable(var)?;
        state.set(key, value);
    }
    debug!(vars = opts.vars.len(), "Resolved template variables");

    let runtime =
        DockerRuntime::connect(config.docker_host.as_deref(), config.timeout_secs).await?;

    let formulas_dir = opts.formulas_dir;
    let mut executor = StageExecutor::new(
        runtime,
        Arc::new(state),
        Arc::new(move |name: &str| formulas_dir.join(name)),
    )
    .with_mounts(MountPolicy {
        project_mount: config.project_mount.clone(),
        docker_socket: config.docker_socket.clone(),
    });

    // JSON出力時はstdoutを結果専用にする
    if opts.json {
        let stderr = Arc::new(Mutex::new(std::io::stderr()));
        executor = executor.with_host(HostStreams::new(stderr.clone(), stderr));
    } else {
        println!(
            "{} {}",
            "▶".blue(),
            format!("ステージを実行中: {}", stage.image).bold()
        );
        println!();
    }

    let result = executor.run_stage(&opts.formula, &stage).await;
    if let Ok(outputs) = &result {
        info!(outputs = outputs.len(), "Stage finished");
    }

    match result {
        Ok(outputs) if opts.json => {
            println!("{}", serde_json::to_string_pretty(&outputs)?);
        }
        Ok(outputs) => print_outputs(&outputs),
        Err(e) => {
            debug!(phase = %e.phase(), "Stage failed");
            eprintln!();
            eprintln!(
                "{}",
                format!("✗ ステージが失敗しました ({})", e.phase()).red().bold()
            );
            eprintln!("  {}", e);
            let code = if matches!(e, StageError::Interrupted) {
                130
            } else {
                1
            };
            std::process::exit(code);
        }
    }

    Ok(())
}

fn print_outputs(outputs: &[StageOutput]) {
    println!();
    println!("{}", "✓ ステージ完了".green().bold());

    if outputs.is_empty() {
        return;
    }

    println!("出力:");
    for output in outputs {
        // 複数行の値は1行目だけ表示
        let mut lines = output.value.lines();
        let first = lines.next().unwrap_or("");
        let more = if lines.next().is_some() { " …" } else { "" };
        println!("  {} = {}{}", output.id.cyan(), first, more.dimmed());
    }
}
