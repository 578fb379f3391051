use std::path::Path;

use id3::{Tag, TagLike, Version};

use crate::models::{EpisodeRecord, TagSet};

const UNKNOWN_GUESTS: &str = "Unknown guests";
const UNKNOWN_EPISODE: &str = "Unknown Episode";

/// Writes a flat tag set into an audio file.
pub trait TagWriter {
    fn write(&self, path: &Path, tags: &TagSet) -> crate::error::Result<()>;
}

/// ID3v2.4 writer. Frames already in the file (ffmpeg adds an encoder frame)
/// are kept; only artist, album and title are replaced.
#[derive(Debug, Clone, Copy, Default)]
pub struct Id3Writer;

impl TagWriter for Id3Writer {
    fn write(&self, path: &Path, tags: &TagSet) -> crate::error::Result<()> {
        let mut tag = match Tag::read_from_path(path) {
            Ok(tag) => tag,
            Err(e) if matches!(e.kind, id3::ErrorKind::NoTag) => Tag::new(),
            Err(e) => return Err(e.into()),
        };
        tag.set_artist(&tags.artist);
        tag.set_album(&tags.album);
        tag.set_title(&tags.title);
        tag.write_to_path(path, Version::Id3v24)?;
        Ok(())
    }
}

/// Artist is the guest list, album the show, title the date plus synopsis.
pub fn tag_set(record: &EpisodeRecord, show_title: &str) -> TagSet {
    let artist = if record.guest_names.is_empty() {
        UNKNOWN_GUESTS.to_string()
    } else {
        record.guest_names.join(", ")
    };
    let synopsis = record.synopsis.trim();
    let synopsis = if synopsis.is_empty() {
        UNKNOWN_EPISODE
    } else {
        synopsis
    };
    TagSet {
        artist,
        album: show_title.to_string(),
        title: format!("{}: {synopsis}", record.broadcast_date),
    }
}
