//! Helpers shared by the directory-based readers

use std::fs;
use std::path::{Path, PathBuf};

use rowflow_core::{Buffer, DataType, SamplerSpec, Tensor};

use crate::error::{Error, Result};

/// Sampler used by folder-style sources when none is given
pub fn default_sampler() -> SamplerSpec {
    SamplerSpec::Random {
        replacement: false,
        num_samples: 0,
    }
}

/// Check that `dir` exists and is a directory
pub(crate) fn existing_dir(dir: &Path) -> Result<PathBuf> {
    if dir.as_os_str().is_empty() || !dir.is_dir() {
        return Err(Error::NotFound(dir.to_path_buf()));
    }
    Ok(dir.to_path_buf())
}

/// Lower-case extensions without the leading dot
pub(crate) fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .collect()
}

/// Whether `path` passes the extension filter (empty filter accepts all)
pub(crate) fn has_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

/// Sorted entries of `dir` matching `keep`
pub(crate) fn sorted_entries(dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if keep(&path) {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

/// Whole file as a 1-D `UInt8` tensor
pub(crate) fn file_tensor(path: &Path) -> rowflow_core::Result<Tensor> {
    let bytes = fs::read(path)?;
    let len = bytes.len();
    Tensor::from_bytes(DataType::UInt8, vec![len], Buffer::from_vec(bytes))
}

/// Map a global sample index to (segment, index within segment)
///
/// `ends` holds the cumulative sample count after each segment.
pub(crate) fn locate(ends: &[usize], index: usize) -> Option<(usize, usize)> {
    let segment = ends.partition_point(|end| *end <= index);
    let start = if segment == 0 { 0 } else { ends[segment - 1] };
    (segment < ends.len()).then(|| (segment, index - start))
}
