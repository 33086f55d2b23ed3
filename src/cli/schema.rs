use std::fs;
use std::path::PathBuf;

use clap::Args;

use super::CliContext;
use cellflow::model::GraphModel;

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Write the schema here instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub async fn execute(args: SchemaArgs, _context: &CliContext) -> anyhow::Result<()> {
    let schema = GraphModel::schema()?;
    let json = serde_json::to_string_pretty(&schema)?;
    match args.out {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
            fs::write(&path, json)?;
            println!("Schema written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
