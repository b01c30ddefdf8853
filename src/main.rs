use clap::Parser;
use miette::{IntoDiagnostic, Result};
use rekber::interfaces::csv::report_writer::ReportWriter;
use rekber::interfaces::csv::script_reader::ScriptReader;
use rekber::interfaces::runner::ScenarioRunner;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario script CSV file
    script: PathBuf,

    /// Simulated payment-verification delay in milliseconds
    #[arg(long, default_value_t = 250)]
    verification_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut runner = ScenarioRunner::new(Duration::from_millis(cli.verification_delay_ms));

    let file = File::open(cli.script).into_diagnostic()?;
    let reader = ScriptReader::new(file);
    for command in reader.commands() {
        match command {
            Ok(command) => {
                if let Err(e) = runner.run_command(command).await {
                    eprintln!("Error executing command: {e}");
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {e}");
            }
        }
    }

    let rows = runner.finish().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    writer
        .write_report(rows.iter().map(|(label, tx)| (label.as_str(), tx)))
        .into_diagnostic()?;

    Ok(())
}
