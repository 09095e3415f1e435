#![deny(warnings)]
use std::process::ExitCode;
use std::rc::Rc;

use clap::Parser;
use smol::LocalExecutor;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use node_test::cli::{Cli, TransportSpec, build_middleware};
use node_test::harness::{Outcome, TestReport, run_case};
use node_test::io::catalog::Catalog;
use node_test::msg::MessageConverter;

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("node_test=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn execute(cli: &Cli, executor: Rc<LocalExecutor<'static>>) -> anyhow::Result<TestReport> {
    let params = cli.load_params()?;
    let registry = cli.load_registry()?;
    let catalog = Catalog::from_params(&params)?;
    let middleware =
        build_middleware(TransportSpec::from(cli), executor, &cli.node(), catalog).await?;
    let converter = MessageConverter::new(&registry).strict(cli.strict);

    let report = run_case(cli.case, &params, middleware.as_ref(), converter).await;
    println!("{}", report.summary_line());
    if let Outcome::Failed { message } = &report.outcome {
        println!("{}", message);
    }
    if let Some(path) = &cli.report {
        report.write_json(path)?;
        info!(path = %path.display(), "Wrote test report");
    }
    Ok(report)
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let class = cli.case.class_name();

    let executor = Rc::new(LocalExecutor::new());
    let result = smol::block_on(executor.run(execute(&cli, executor.clone())));
    let code = match result {
        Ok(report) if report.passed() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("node_test could not run {}: {:#}", class, e);
            ExitCode::from(2)
        }
    };
    println!("{} exiting", class);
    code
}
