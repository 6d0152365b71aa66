//! Guardrails CLI entry point

fn main() -> anyhow::Result<()> {
    guardrails_cli::run()
}
