use anyhow::Result;
use std::path::Path;

use crate::{
    config::Config,
    protocol::{DiffResult, FileRecord},
    transfer::{get_diff, ClientOptions},
};

pub async fn run(uri: &str, directory: &Path, tag: &str, config: &Config) -> Result<()> {
    let diff = get_diff(uri, directory, tag, &ClientOptions::from(config)).await?;
    print!("{}", render(&diff));
    Ok(())
}

fn render(diff: &DiffResult) -> String {
    if diff.is_empty() {
        return "No differences\n".to_string();
    }
    let mut out = String::new();
    section(&mut out, "Modified files:", &diff.modified);
    section(&mut out, "New files here:", &diff.client_new);
    section(&mut out, "New files on host:", &diff.server_new);
    out
}

fn section(out: &mut String, title: &str, files: &[FileRecord]) {
    if files.is_empty() {
        return;
    }
    out.push_str(title);
    out.push('\n');
    for f in files {
        out.push_str("- ");
        out.push_str(&f.path);
        out.push('\n');
    }
}
