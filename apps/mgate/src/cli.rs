use clap::Parser;

#[derive(Parser)]
#[command(name = "mgate")]
pub(crate) struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    pub(crate) host: String,
    #[arg(long, default_value_t = 8686)]
    pub(crate) port: u16,
    /// Outbound proxy for upstream calls, e.g. http://127.0.0.1:7890.
    #[arg(long)]
    pub(crate) proxy: Option<String>,
    /// JSON file with caller api keys and limit policies. Without it the
    /// gateway runs open and unmetered.
    #[arg(long)]
    pub(crate) keys_file: Option<String>,
}
