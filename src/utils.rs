use futures::stream::{FuturesUnordered, StreamExt};
use std::path::{Path, PathBuf};
use tracing::error;

pub async fn scan_for_files(path: impl AsRef<Path>) -> anyhow::Result<Vec<PathBuf>> {
    let mut dir_entries = tokio::fs::read_dir(path).await?;
    let mut files_in_folder = vec![];

    while let Some(dir_entry) = dir_entries.next_entry().await? {
        let is_file = dir_entry
            .file_type()
            .await
            .map(|file_type| file_type.is_file())
            .unwrap_or(false);

        if is_file {
            files_in_folder.push(dir_entry.path());
        }
    }

    files_in_folder.sort();

    Ok(files_in_folder)
}

/// Parses every file on the blocking pool. Files that fail to parse are
/// logged and skipped, results come back in the order of `files`.
pub async fn parse_files<T: 'static + Send>(
    files: Vec<PathBuf>,
    parse_fn: impl Fn(PathBuf) -> anyhow::Result<T> + 'static + Send + Copy,
) -> anyhow::Result<Vec<T>> {
    let mut handles = files
        .into_iter()
        .enumerate()
        .map(|(i, path)| async move {
            let display = path.display().to_string();
            let result = tokio::task::spawn_blocking(move || parse_fn(path)).await;

            (i, display, result)
        })
        .collect::<FuturesUnordered<_>>();

    let mut results = vec![];

    while let Some((i, path, join_handle_result)) = handles.next().await {
        match join_handle_result {
            Ok(Ok(result)) => results.push((i, result)),
            Ok(Err(e)) => error!(path = path.as_str(), "ParseError: {:?}", e),
            Err(e) => error!(path = path.as_str(), "JoinError: {:?}", e),
        }
    }

    results.sort_by_key(|(i, _)| *i);

    Ok(results.into_iter().map(|(_, result)| result).collect())
}

pub fn is_yaml(path: impl AsRef<Path>) -> bool {
    matches!(
        path.as_ref().extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}
