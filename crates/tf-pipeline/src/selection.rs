//! Track selection: decides which source tracks are carried into the target.

use tf_core::TrackKind;
use tf_media::MediaSource;

/// Whether a track with this MIME type is written to the target.
///
/// Tracks without a MIME type are always dropped, audio is dropped when
/// `remove_audio` is set, and anything that is neither audio nor video is
/// dropped when `remove_metadata` is set.
pub fn should_include_track(mime: Option<&str>, remove_audio: bool, remove_metadata: bool) -> bool {
    let Some(mime) = mime else {
        tracing::error!("Mime type is missing for track");
        return false;
    };

    match TrackKind::from_mime(mime) {
        TrackKind::Audio => !remove_audio,
        TrackKind::Video => true,
        TrackKind::Other => !remove_metadata,
    }
}

/// Number of source tracks that will be written, i.e. the target track
/// count. Tracks whose format cannot be read count as excluded.
pub fn count_included_tracks(source: &dyn MediaSource, remove_audio: bool, remove_metadata: bool) -> usize {
    (0..source.track_count())
        .filter(|&track| {
            let format = source.track_format(track).ok();
            let mime = format.as_ref().and_then(|f| f.mime());
            should_include_track(mime, remove_audio, remove_metadata)
        })
        .count()
}
