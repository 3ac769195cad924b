//! Archive staging for a generation job.
//!
//! Each job writes its documents into one ZIP, staged as a temp file in the
//! artifacts directory and persisted under `<job_id>.zip` only by
//! [`ArchiveBuilder::finalize`]. A job that dies mid-run leaves no partial
//! archive behind: dropping the builder unlinks the temp file.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ArchiveError;

/// Shape of a finalized archive, reported on the job snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub bytes: u64,
}

pub struct ArchiveBuilder {
    writer: ZipWriter<NamedTempFile>,
    names: HashSet<String>,
}

impl ArchiveBuilder {
    /// Stages a new archive as a temp file inside `dir`, so the final persist
    /// is a rename on the same filesystem.
    pub fn create(dir: &Path) -> Result<Self, ArchiveError> {
        std::fs::create_dir_all(dir)?;
        let staging = NamedTempFile::new_in(dir)?;
        Ok(ArchiveBuilder {
            writer: ZipWriter::new(staging),
            names: HashSet::new(),
        })
    }

    /// Whether an entry with this exact name was already appended.
    pub fn contains(&self, entry_name: &str) -> bool {
        self.names.contains(entry_name)
    }

    pub fn entries(&self) -> usize {
        self.names.len()
    }

    /// Appends one document. Entry names must be unique; the caller
    /// disambiguates before calling, so a duplicate here is a hard fault.
    pub fn append(&mut self, entry_name: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        if self.names.contains(entry_name) {
            return Err(ArchiveError::DuplicateEntry(entry_name.to_string()));
        }
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        self.writer.start_file(entry_name, options)?;
        self.writer.write_all(bytes)?;
        self.names.insert(entry_name.to_string());
        Ok(())
    }

    /// Writes the central directory, syncs, and moves the archive to `dest`.
    /// Only after this returns is the archive offered for download.
    pub fn finalize(self, dest: &Path) -> Result<ArchiveSummary, ArchiveError> {
        let entries = self.names.len();
        let mut staging = self.writer.finish()?;
        staging.flush()?;
        staging.as_file().sync_all()?;
        let file = staging.persist(dest).map_err(|e| ArchiveError::Io(e.error))?;
        let bytes = file.metadata()?.len();
        Ok(ArchiveSummary { entries, bytes })
    }

    /// Drops the staged archive; the temp file is unlinked.
    pub fn discard(self) {
        let _ = self;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_an_archive_with_ordered_entries() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.zip");

        let mut builder = ArchiveBuilder::create(dir.path()).unwrap();
        builder.append("alice.pdf", b"%PDF-alice").unwrap();
        builder.append("bob.pdf", b"%PDF-bob").unwrap();
        builder.append("carol.pdf", b"%PDF-carol").unwrap();
        assert_eq!(builder.entries(), 3);

        let summary = builder.finalize(&dest).unwrap();
        assert_eq!(summary.entries, 3);
        assert!(summary.bytes > 0);
        assert_eq!(summary.bytes, dest.metadata().unwrap().len());

        let mut archive = zip::ZipArchive::new(std::fs::File::open(&dest).unwrap()).unwrap();
        assert_eq!(archive.len(), 3);
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["alice.pdf", "bob.pdf", "carol.pdf"]);

        let mut first = archive.by_index(0).unwrap();
        let mut contents = Vec::new();
        std::io::Read::read_to_end(&mut first, &mut contents).unwrap();
        assert_eq!(contents, b"%PDF-alice");
    }

    #[test]
    fn duplicate_entry_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = ArchiveBuilder::create(dir.path()).unwrap();
        builder.append("a.pdf", b"x").unwrap();
        let err = builder.append("a.pdf", b"y").unwrap_err();
        assert!(matches!(err, ArchiveError::DuplicateEntry(name) if name == "a.pdf"));
        // The first entry is untouched.
        assert_eq!(builder.entries(), 1);
        assert!(builder.contains("a.pdf"));
    }

    #[test]
    fn discard_leaves_no_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = ArchiveBuilder::create(dir.path()).unwrap();
        builder.append("a.pdf", b"x").unwrap();
        builder.discard();
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn empty_archive_finalizes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("empty.zip");
        let builder = ArchiveBuilder::create(dir.path()).unwrap();
        let summary = builder.finalize(&dest).unwrap();
        assert_eq!(summary.entries, 0);
        let archive = zip::ZipArchive::new(std::fs::File::open(&dest).unwrap()).unwrap();
        assert_eq!(archive.len(), 0);
    }
}
