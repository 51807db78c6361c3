//! Raw filesystem mutations.
//!
//! Thin wrappers over `std::fs` with typed errors. Cache invalidation is the
//! engine's job and happens only after one of these returns `Ok` — a failed
//! operation must leave the cache untouched.

use std::fs;
use std::path::Path;

use crate::error::{Result, VfsError};

/// Creates an empty file. Fails if the path already exists.
pub fn create_file(path: &Path) -> Result<()> {
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|error| VfsError::from_io(path, error))?;
    Ok(())
}

/// Creates a single directory. The parent must already exist.
pub fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir(path).map_err(|error| VfsError::from_io(path, error))
}

/// Renames or moves an entry. Refuses to clobber an existing destination.
pub fn rename_entry(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        return Err(VfsError::InvalidPath(format!(
            "destination already exists: {}",
            to.display()
        )));
    }
    fs::rename(from, to).map_err(|error| VfsError::from_io(from, error))
}

/// Copies a file or a directory tree. Refuses to clobber an existing
/// destination or to copy a directory into itself.
pub fn copy_entry(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        return Err(VfsError::InvalidPath(format!(
            "destination already exists: {}",
            to.display()
        )));
    }
    if to.starts_with(from) {
        return Err(VfsError::InvalidPath(format!(
            "cannot copy {} into itself",
            from.display()
        )));
    }

    let metadata = fs::symlink_metadata(from).map_err(|error| VfsError::from_io(from, error))?;
    if metadata.is_dir() {
        copy_dir_recursive(from, to)
    } else {
        fs::copy(from, to).map_err(|error| VfsError::from_io(from, error))?;
        Ok(())
    }
}

/// Deletes a file or a directory tree.
pub fn delete_entry(path: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(path).map_err(|error| VfsError::from_io(path, error))?;
    if metadata.is_dir() {
        fs::remove_dir_all(path).map_err(|error| VfsError::from_io(path, error))
    } else {
        fs::remove_file(path).map_err(|error| VfsError::from_io(path, error))
    }
}

fn copy_dir_recursive(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir(to).map_err(|error| VfsError::from_io(to, error))?;
    let read_dir = fs::read_dir(from).map_err(|error| VfsError::from_io(from, error))?;

    for entry in read_dir {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                log::debug!("skipping unreadable entry under {}: {error}", from.display());
                continue;
            }
        };
        let source = entry.path();
        let target = to.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|error| VfsError::from_io(&source, error))?;
        if file_type.is_dir() {
            copy_dir_recursive(&source, &target)?;
        } else {
            fs::copy(&source, &target).map_err(|error| VfsError::from_io(&source, error))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn create_file_refuses_to_clobber() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");

        create_file(&path).unwrap();
        assert!(path.is_file());
        assert!(create_file(&path).is_err());
    }

    #[test]
    fn rename_refuses_existing_destination() {
        let temp = TempDir::new().unwrap();
        File::create(temp.path().join("a.txt")).unwrap();
        File::create(temp.path().join("b.txt")).unwrap();

        let err = rename_entry(&temp.path().join("a.txt"), &temp.path().join("b.txt"));
        assert!(err.is_err());
        assert!(temp.path().join("a.txt").exists());
    }

    #[test]
    fn copy_recurses_into_directories() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src/nested")).unwrap();
        let mut file = File::create(temp.path().join("src/nested/a.txt")).unwrap();
        file.write_all(b"payload").unwrap();
        drop(file);

        copy_entry(&temp.path().join("src"), &temp.path().join("dst")).unwrap();
        let copied = fs::read(temp.path().join("dst/nested/a.txt")).unwrap();
        assert_eq!(copied, b"payload");
        assert!(temp.path().join("src/nested/a.txt").exists());
    }

    #[test]
    fn copy_into_itself_is_rejected() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("dir")).unwrap();

        let err = copy_entry(&temp.path().join("dir"), &temp.path().join("dir/inner"));
        assert!(matches!(err, Err(VfsError::InvalidPath(_))));
    }

    #[test]
    fn delete_handles_files_and_trees() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("dir")).unwrap();
        File::create(temp.path().join("dir/a.txt")).unwrap();
        File::create(temp.path().join("b.txt")).unwrap();

        delete_entry(&temp.path().join("dir")).unwrap();
        delete_entry(&temp.path().join("b.txt")).unwrap();
        assert!(!temp.path().join("dir").exists());
        assert!(!temp.path().join("b.txt").exists());

        assert!(matches!(
            delete_entry(&temp.path().join("b.txt")),
            Err(VfsError::NotFound(_))
        ));
    }
}
