//! MacOdyssey command-line entry point

fn main() -> anyhow::Result<()> {
    macodyssey::cli::run_cli()
}
