use std::io::{BufWriter, Write};
use std::path::Path;

use super::{EmbeddingMatrix, ExtractError};
use crate::table::ensure_parent_dir;

/// Replace `path` with the features extracted so far.
///
/// The table is written to a temp file in the same directory and renamed
/// over the target, so readers never see a half-written checkpoint.
pub fn write_checkpoint(matrix: &EmbeddingMatrix, path: &Path) -> Result<(), ExtractError> {
    ensure_parent_dir(path)?;
    let parent = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let io_err = |source: std::io::Error| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".checkpoint")
        .suffix(".csv")
        .tempfile_in(parent)
        .map_err(io_err)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        matrix
            .write_features_csv(&mut writer)
            .map_err(|source| ExtractError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
        writer.flush().map_err(io_err)?;
    }
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|err| io_err(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_is_replaced_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmp_embeddings.csv");
        let mut matrix = EmbeddingMatrix::new(3, &[]);
        matrix
            .push(vec![1.0, 2.0, 3.0], "a".into(), "a".into(), Vec::new())
            .unwrap();
        write_checkpoint(&matrix, &path).unwrap();
        matrix
            .push(vec![4.0, 5.0, 6.0], "b".into(), "b".into(), Vec::new())
            .unwrap();
        write_checkpoint(&matrix, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text.lines().collect::<Vec<_>>(),
            vec!["feature_0,feature_1,feature_2", "1,2,3", "4,5,6"]
        );
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name() != "tmp_embeddings.csv")
            .collect();
        assert!(leftovers.is_empty());
    }
}
