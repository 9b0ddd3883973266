//! Playback modes and next-track selection.
//!
//! Shuffle never reorders the stored playlist. It only changes how the
//! next index is picked:
//!
//! - with repeat-all every pick is uniform over the list minus the
//!   current index, so other tracks may come back before all were heard;
//! - without it, picks are drawn without replacement from a visited set
//!   that resets once exhausted or whenever the playlist changes.

use std::collections::HashSet;
use std::fmt;

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{ Rng, SeedableRng };


/// Repeat mode.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum Repeat {
    #[default]
    Off,
    One,
    All,
}


impl Repeat {
    /// Cycles off -> all -> one -> off.
    pub fn cycle( self ) -> Self {
        match self {
            Repeat::Off => Repeat::All,
            Repeat::All => Repeat::One,
            Repeat::One => Repeat::Off,
        }
    }
}


impl fmt::Display for Repeat {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.write_str( match self {
            Repeat::Off => "off",
            Repeat::One => "one",
            Repeat::All => "all",
        })
    }
}


/// Orthogonal playback flags.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub struct PlaybackMode {
    pub repeat: Repeat,
    pub shuffle: bool,
    /// Natural completion leaves playback idle.
    pub stop_after: bool,
}


/// Picks the next and previous playlist index.
#[derive( Debug )]
pub struct TrackSelector {
    rng: StdRng,
    visited: HashSet<usize>,
    history: Vec<usize>,
    /// Entries stepped back over with `prev`, replayed by `next`.
    ahead: Vec<usize>,
    generation: Option<u64>,
}


impl Default for TrackSelector {
    fn default() -> Self {
        Self::new()
    }
}


impl TrackSelector {
    pub fn new() -> Self {
        Self::with_rng( StdRng::from_os_rng() )
    }


    /// Selector with a fixed seed, for reproducible runs.
    pub fn seeded( seed: u64 ) -> Self {
        Self::with_rng( StdRng::seed_from_u64( seed ) )
    }


    fn with_rng( rng: StdRng ) -> Self {
        Self {
            rng,
            visited: HashSet::new(),
            history: Vec::new(),
            ahead: Vec::new(),
            generation: None,
        }
    }


    /// Records that `index` started playing.
    pub fn mark( &mut self, index: usize ) {
        self.visited.insert( index );
        self.ahead.retain( |&i| i != index );
        if self.history.last() != Some( &index ) {
            self.history.push( index );
        }
    }


    /// Drops the visited set and history if the playlist changed since
    /// the last call, re-marking the current index.
    pub fn sync( &mut self, generation: u64, current: Option<usize> ) {
        if self.generation == Some( generation ) {
            return;
        }
        if self.generation.is_some() {
            tracing::debug!( "Playlist changed, resetting shuffle state" );
        }
        self.generation = Some( generation );
        self.reset();
        if let Some( index ) = current {
            self.mark( index );
        }
    }


    /// Forgets visited indices and history.
    pub fn reset( &mut self ) {
        self.visited.clear();
        self.history.clear();
        self.ahead.clear();
    }


    /// Index to play after `current` in a list of `len` entries.
    ///
    /// Returns `None` at the end of the list, which means playback goes idle.
    pub fn next( &mut self, mode: PlaybackMode, current: Option<usize>, len: usize ) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let current = current.filter( |&i| i < len );

        if mode.repeat == Repeat::One {
            return Some( current.unwrap_or( 0 ) );
        }

        if mode.shuffle {
            if let Some( index ) = self.ahead.pop().filter( |&i| i < len ) {
                return Some( index );
            }
            return if mode.repeat == Repeat::All {
                self.pick_any( current, len )
            } else {
                self.pick_unvisited( current, len )
            };
        }

        match current {
            None => Some( 0 ),
            Some( i ) if i + 1 < len => Some( i + 1 ),
            Some( _ ) if mode.repeat == Repeat::All => Some( 0 ),
            Some( _ ) => None,
        }
    }


    /// Index to play before `current`.
    ///
    /// In shuffle mode this walks back through the play history; a later
    /// `next` walks forward again over the same entries.
    pub fn prev( &mut self, mode: PlaybackMode, current: Option<usize>, len: usize ) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let current = current.filter( |&i| i < len );

        if mode.repeat == Repeat::One {
            return Some( current.unwrap_or( 0 ) );
        }

        if mode.shuffle {
            let on_top = current.is_some() && self.history.last().copied() == current;
            let depth = if on_top { 2 } else { 1 };
            if self.history.len() < depth {
                return None;
            }
            if on_top {
                self.history.pop();
            }
            let previous = self.history.pop().filter( |&i| i < len );
            if let ( Some( _ ), Some( current ) ) = ( previous, current ) {
                self.ahead.push( current );
            }
            return previous;
        }

        match current {
            None => Some( 0 ),
            Some( i ) if i > 0 => Some( i - 1 ),
            Some( _ ) if mode.repeat == Repeat::All => Some( len - 1 ),
            Some( _ ) => None,
        }
    }


    fn pick_any( &mut self, current: Option<usize>, len: usize ) -> Option<usize> {
        if len == 1 {
            return Some( 0 );
        }
        loop {
            let pick = self.rng.random_range( 0..len );
            if Some( pick ) != current {
                return Some( pick );
            }
        }
    }


    fn pick_unvisited( &mut self, current: Option<usize>, len: usize ) -> Option<usize> {
        if let Some( i ) = current {
            self.visited.insert( i );
        }
        let pool: Vec<usize> = ( 0..len )
            .filter( |i| !self.visited.contains( i ) )
            .collect();

        match pool.choose( &mut self.rng ) {
            Some( &pick ) => Some( pick ),
            None => {
                tracing::debug!( "Shuffle cycle of {} complete", len );
                self.visited.clear();
                None
            }
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn mode( repeat: Repeat, shuffle: bool ) -> PlaybackMode {
        PlaybackMode { repeat, shuffle, stop_after: false }
    }


    #[test]
    fn test_normal_advances_and_ends() {
        let mut sel = TrackSelector::seeded( 1 );
        let m = mode( Repeat::Off, false );
        assert_eq!( sel.next( m, Some( 0 ), 3 ), Some( 1 ) );
        assert_eq!( sel.next( m, Some( 2 ), 3 ), None );
        assert_eq!( sel.next( m, None, 3 ), Some( 0 ) );
        assert_eq!( sel.prev( m, Some( 0 ), 3 ), None );
        assert_eq!( sel.prev( m, Some( 2 ), 3 ), Some( 1 ) );
        assert_eq!( sel.next( m, Some( 0 ), 0 ), None );
    }


    #[test]
    fn test_repeat_all_wraps() {
        let mut sel = TrackSelector::seeded( 1 );
        let m = mode( Repeat::All, false );
        assert_eq!( sel.next( m, Some( 2 ), 3 ), Some( 0 ) );
        assert_eq!( sel.prev( m, Some( 0 ), 3 ), Some( 2 ) );
        assert_eq!( sel.next( m, Some( 0 ), 1 ), Some( 0 ) );
    }


    #[test]
    fn test_repeat_one_reselects() {
        let mut sel = TrackSelector::seeded( 1 );
        for shuffle in [ false, true ] {
            let m = mode( Repeat::One, shuffle );
            assert_eq!( sel.next( m, Some( 4 ), 5 ), Some( 4 ) );
            assert_eq!( sel.prev( m, Some( 4 ), 5 ), Some( 4 ) );
        }
    }


    #[test]
    fn test_shuffle_visits_each_once() {
        for len in 1..=12 {
            let mut sel = TrackSelector::seeded( len as u64 );
            let m = mode( Repeat::Off, true );

            let first = len / 2;
            sel.mark( first );
            let mut seen = vec![ first ];
            let mut current = first;
            while let Some( next ) = sel.next( m, Some( current ), len ) {
                assert!( !seen.contains( &next ), "index {} repeated", next );
                sel.mark( next );
                seen.push( next );
                current = next;
            }
            seen.sort_unstable();
            assert_eq!( seen, ( 0..len ).collect::<Vec<_>>() );

            // The next cycle starts fresh.
            assert!( sel.next( m, Some( current ), len ).is_some() || len == 1 );
        }
    }


    #[test]
    fn test_shuffle_repeat_all_never_repeats_current() {
        let mut sel = TrackSelector::seeded( 9 );
        let m = mode( Repeat::All, true );
        let mut current = 0;
        for _ in 0..200 {
            let next = sel.next( m, Some( current ), 4 ).unwrap();
            assert_ne!( next, current );
            current = next;
        }
        assert_eq!( sel.next( m, Some( 0 ), 1 ), Some( 0 ) );
    }


    #[test]
    fn test_shuffle_prev_walks_history() {
        let mut sel = TrackSelector::seeded( 3 );
        let m = mode( Repeat::Off, true );
        sel.mark( 2 );
        sel.mark( 0 );
        sel.mark( 3 );
        assert_eq!( sel.prev( m, Some( 3 ), 5 ), Some( 0 ) );
        sel.mark( 0 );
        assert_eq!( sel.prev( m, Some( 0 ), 5 ), Some( 2 ) );
        sel.mark( 2 );
        assert_eq!( sel.prev( m, Some( 2 ), 5 ), None );
    }


    #[test]
    fn test_shuffle_next_retraces_after_prev() {
        let mut sel = TrackSelector::seeded( 4 );
        let m = mode( Repeat::Off, true );
        for index in [ 5, 1, 7 ] {
            sel.mark( index );
        }

        assert_eq!( sel.prev( m, Some( 7 ), 10 ), Some( 1 ) );
        sel.mark( 1 );
        assert_eq!( sel.prev( m, Some( 1 ), 10 ), Some( 5 ) );
        sel.mark( 5 );

        assert_eq!( sel.next( m, Some( 5 ), 10 ), Some( 1 ) );
        sel.mark( 1 );
        assert_eq!( sel.next( m, Some( 1 ), 10 ), Some( 7 ) );
        sel.mark( 7 );

        let fresh = sel.next( m, Some( 7 ), 10 ).unwrap();
        assert!( ![ 5, 1, 7 ].contains( &fresh ) );
    }


    #[test]
    fn test_prev_at_start_of_history_keeps_it() {
        let mut sel = TrackSelector::seeded( 4 );
        let m = mode( Repeat::Off, true );
        sel.mark( 3 );
        assert_eq!( sel.prev( m, Some( 3 ), 5 ), None );
        sel.mark( 1 );
        assert_eq!( sel.prev( m, Some( 1 ), 5 ), Some( 3 ) );
    }


    #[test]
    fn test_sync_resets_on_mutation() {
        let mut sel = TrackSelector::seeded( 5 );
        let m = mode( Repeat::Off, true );
        sel.sync( 1, Some( 0 ) );
        sel.mark( 1 );
        sel.mark( 2 );
        assert_eq!( sel.next( m, Some( 2 ), 3 ), None );

        sel.sync( 1, Some( 0 ) );
        sel.sync( 2, Some( 0 ) );
        let next = sel.next( m, Some( 0 ), 3 ).unwrap();
        assert!( next == 1 || next == 2 );
    }


    #[test]
    fn test_repeat_cycle() {
        assert_eq!( Repeat::Off.cycle(), Repeat::All );
        assert_eq!( Repeat::All.cycle(), Repeat::One );
        assert_eq!( Repeat::One.cycle(), Repeat::Off );
    }
}
