//! Tag reading via Symphonia.
//!
//! Supplies display metadata for entries. Reading is best effort: any
//! failure simply yields no tags and the entry falls back to its file name.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{ MetadataOptions, StandardTagKey, Tag };
use symphonia::core::probe::Hint;


/// Display metadata for a track.
#[derive( Debug, Clone, Default, PartialEq )]
pub struct Tags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: Option<Duration>,
}


impl Tags {
    /// Formats "Artist - Title", or whichever of the two is present.
    pub fn display( &self ) -> Option<String> {
        match ( self.artist.as_deref(), self.title.as_deref() ) {
            ( Some( artist ), Some( title ) ) => Some( format!( "{} - {}", artist, title ) ),
            ( Some( artist ), None ) => Some( artist.to_string() ),
            ( None, Some( title ) ) => Some( title.to_string() ),
            ( None, None ) => None,
        }
    }


    fn absorb( &mut self, tags: &[Tag] ) {
        for tag in tags {
            let Some( key ) = tag.std_key else { continue };
            let slot = match key {
                StandardTagKey::TrackTitle => &mut self.title,
                StandardTagKey::Artist => &mut self.artist,
                StandardTagKey::Album => &mut self.album,
                _ => continue,
            };
            if slot.is_none() {
                let value = tag.value.to_string();
                if !value.trim().is_empty() {
                    *slot = Some( value.trim().to_string() );
                }
            }
        }
    }
}


/// Source of track metadata.
pub trait TagReader: Send + Sync {
    /// Reads tags for a locator, or `None` when unavailable.
    fn fetch( &self, locator: &str ) -> Option<Tags>;
}


/// Reader that never finds tags.
#[derive( Debug, Default, Clone, Copy )]
pub struct NoTags;


impl TagReader for NoTags {
    fn fetch( &self, _locator: &str ) -> Option<Tags> {
        None
    }
}


/// Tag reader probing local files with Symphonia.
#[derive( Debug, Default, Clone, Copy )]
pub struct SymphoniaTags;


impl TagReader for SymphoniaTags {
    fn fetch( &self, locator: &str ) -> Option<Tags> {
        let path = Path::new( locator );
        if !path.is_file() {
            return None;
        }

        match probe( path ) {
            Ok( tags ) => Some( tags ),
            Err( e ) => {
                tracing::debug!( "No tags for {:?}: {}", path, e );
                None
            }
        }
    }
}


fn probe( path: &Path ) -> Result<Tags, symphonia::core::errors::Error> {
    let file = File::open( path )?;
    let mss = MediaSourceStream::new( Box::new( file ), Default::default() );

    let mut hint = Hint::new();
    if let Some( ext ) = path.extension().and_then( |e| e.to_str() ) {
        hint.with_extension( ext );
    }

    let mut probed = symphonia::default::get_probe()
        .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )?;

    let mut tags = Tags::default();

    // Container-level tags (ID3v2 ahead of the stream) come first.
    if let Some( metadata ) = probed.metadata.get() {
        if let Some( rev ) = metadata.current() {
            tags.absorb( rev.tags() );
        }
    }
    if let Some( rev ) = probed.format.metadata().current() {
        tags.absorb( rev.tags() );
    }

    tags.duration = probed.format
        .tracks()
        .iter()
        .find( |t| t.codec_params.codec != CODEC_TYPE_NULL )
        .and_then( |t| {
            let frames = t.codec_params.n_frames?;
            let rate = t.codec_params.sample_rate?;
            Some( Duration::from_secs_f64( frames as f64 / rate as f64 ) )
        });

    Ok( tags )
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_display_variants() {
        let mut tags = Tags::default();
        assert_eq!( tags.display(), None );

        tags.title = Some( "Title".into() );
        assert_eq!( tags.display().as_deref(), Some( "Title" ) );

        tags.artist = Some( "Artist".into() );
        assert_eq!( tags.display().as_deref(), Some( "Artist - Title" ) );

        tags.title = None;
        assert_eq!( tags.display().as_deref(), Some( "Artist" ) );
    }


    #[test]
    fn test_unreadable_file_has_no_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "noise.mp3" );
        std::fs::write( &path, b"definitely not an mp3" ).unwrap();

        assert_eq!( SymphoniaTags.fetch( path.to_str().unwrap() ), None );
        assert_eq!( SymphoniaTags.fetch( "/nonexistent/file.ogg" ), None );
    }
}
