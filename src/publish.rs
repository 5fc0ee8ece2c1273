//! Coordinate publisher.
//! Writes the latest black and white piece sets to a text file, one list per line
//! (black first). Each write goes to a temp file in the same directory and is renamed
//! over the target, so readers see either the previous file or the new one, never a
//! partial write.

use crate::error::{Result, VisionError};
use crate::pieces::PieceSet;
use log::debug;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub struct CoordinatePublisher {
    path: PathBuf,
}

impl CoordinatePublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Publishes two all-empty sets so consumers never see a stale file from a previous run.
    pub fn initialize(&self) -> Result<()> {
        self.publish(&PieceSet::empty(), &PieceSet::empty())
    }

    pub fn publish(&self, black: &PieceSet, white: &PieceSet) -> Result<()> {
        let text = render(black, white);
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| VisionError::io(dir, e))?;
        tmp.write_all(text.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| VisionError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| VisionError::io(&self.path, e.error))?;

        debug!(
            "Published {} black / {} white to {}",
            black.found_count(),
            white.found_count(),
            self.path.display()
        );
        Ok(())
    }
}

/// File body: black list, newline, white list, newline.
pub fn render(black: &PieceSet, white: &PieceSet) -> String {
    format!("{}\n{}\n", black, white)
}

/// Reads back a published file as `(black, white)`.
pub fn parse_published(path: &Path) -> Result<(PieceSet, PieceSet)> {
    let text = fs::read_to_string(path).map_err(|e| VisionError::io(path, e))?;
    let mut lines = text.lines();
    let mut next_set = |which: &str| -> Result<PieceSet> {
        let line = lines
            .next()
            .ok_or_else(|| VisionError::parse(path, format!("missing {} line", which)))?;
        line.parse::<PieceSet>()
            .map_err(|e| VisionError::parse(path, e.to_string()))
    };
    let black = next_set("black")?;
    let white = next_set("white")?;
    Ok((black, white))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pieces::{PieceSlot, PIECES_PER_COLOR};

    #[test]
    fn test_initialize_writes_all_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pieces.txt");
        fs::write(&path, "left over from last run").unwrap();

        let publisher = CoordinatePublisher::new(&path);
        publisher.initialize().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert_eq!(text.matches("(6666, 6666, 0)").count(), 2 * PIECES_PER_COLOR);
    }

    #[test]
    fn test_publish_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = CoordinatePublisher::new(dir.path().join("pieces.txt"));
        let black = PieceSet::from_found([(65.0, 179.0)]);
        let white = PieceSet::from_found([(10.5, 20.25), (200.0, 3.0)]);
        publisher.publish(&black, &white).unwrap();

        let (b, w) = parse_published(publisher.path()).unwrap();
        assert_eq!(b, black);
        assert_eq!(w, white);
        assert_eq!(b.slots()[1], PieceSlot::Empty);
    }

    #[test]
    fn test_republish_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = CoordinatePublisher::new(dir.path().join("pieces.txt"));
        publisher
            .publish(&PieceSet::from_found([(1.0, 1.0)]), &PieceSet::empty())
            .unwrap();
        publisher
            .publish(&PieceSet::empty(), &PieceSet::from_found([(2.0, 2.0)]))
            .unwrap();

        let (b, w) = parse_published(publisher.path()).unwrap();
        assert_eq!(b.found_count(), 0);
        assert_eq!(w.found().next(), Some((2.0, 2.0)));
        // Only the published file remains, no temp files
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_interrupted_write_leaves_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = CoordinatePublisher::new(dir.path().join("pieces.txt"));
        let black = PieceSet::from_found([(65.0, 179.0)]);
        publisher.publish(&black, &PieceSet::empty()).unwrap();

        // A writer that dies before the rename leaves only a half-written temp file
        let mut stale = NamedTempFile::new_in(dir.path()).unwrap();
        stale.write_all(b"[(1.0, 0,").unwrap();
        stale.keep().unwrap();

        let (b, w) = parse_published(publisher.path()).unwrap();
        assert_eq!(b, black);
        assert_eq!(w, PieceSet::empty());
    }

    #[test]
    fn test_parse_published_rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pieces.txt");
        fs::write(&path, format!("{}\n", PieceSet::empty())).unwrap();
        assert!(matches!(
            parse_published(&path),
            Err(VisionError::Parse { .. })
        ));
    }
}
