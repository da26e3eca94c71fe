//! Where each stage of a pipeline reads from and writes to.
//!
//! Everything here is pure: given a stage position and the pipeline length it
//! says which channel ends the stage uses. The orchestrator applies it.

use std::fmt;

/// Which end of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Read,
    Write,
}

/// One end of channel `channel`, which connects stage `channel` to stage `channel + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelEnd {
    pub channel: usize,
    pub side: Side,
}

impl ChannelEnd {
    pub fn read(channel: usize) -> Self {
        Self {
            channel,
            side: Side::Read,
        }
    }

    pub fn write(channel: usize) -> Self {
        Self {
            channel,
            side: Side::Write,
        }
    }
}

impl fmt::Display for ChannelEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.side {
            Side::Read => write!(f, "read end of pipe {}", self.channel),
            Side::Write => write!(f, "write end of pipe {}", self.channel),
        }
    }
}

/// Position of a stage within its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRole {
    /// The pipeline has a single stage.
    Only,
    First,
    Middle,
    Last,
}

/// Standard input and output of a stage. `None` keeps the orchestrator's own stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wiring {
    pub stdin: Option<ChannelEnd>,
    pub stdout: Option<ChannelEnd>,
}

impl Wiring {
    /// Wiring of stage `index` in a pipeline of `total` stages.
    pub fn of(index: usize, total: usize) -> Self {
        StageRole::of(index, total).wiring(index)
    }

    /// The channel ends this stage takes over from the orchestrator.
    pub fn ends(&self) -> impl Iterator<Item = ChannelEnd> {
        self.stdin.into_iter().chain(self.stdout)
    }
}

impl StageRole {
    /// Role of stage `index` in a pipeline of `total` stages.
    ///
    /// An `index` past the end is treated as the last stage.
    pub fn of(index: usize, total: usize) -> Self {
        match (index, total) {
            (_, 0 | 1) => StageRole::Only,
            (0, _) => StageRole::First,
            (i, n) if i + 1 >= n => StageRole::Last,
            _ => StageRole::Middle,
        }
    }

    /// Wiring of the stage at `index` playing this role. Only a role obtained
    /// from [`StageRole::of`] for that same index is meaningful; see [`Wiring::of`].
    fn wiring(self, index: usize) -> Wiring {
        debug_assert!(matches!(self, StageRole::Only | StageRole::First) || index > 0);
        match self {
            StageRole::Only => Wiring {
                stdin: None,
                stdout: None,
            },
            StageRole::First => Wiring {
                stdin: None,
                stdout: Some(ChannelEnd::write(index)),
            },
            StageRole::Middle => Wiring {
                stdin: Some(ChannelEnd::read(index - 1)),
                stdout: Some(ChannelEnd::write(index)),
            },
            StageRole::Last => Wiring {
                stdin: Some(ChannelEnd::read(index - 1)),
                stdout: None,
            },
        }
    }
}

/// Number of channels a pipeline of `total` stages needs.
pub fn channel_count(total: usize) -> usize {
    total.saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn roles_by_position() {
        assert_eq!(StageRole::of(0, 1), StageRole::Only);
        assert_eq!(StageRole::of(0, 2), StageRole::First);
        assert_eq!(StageRole::of(1, 2), StageRole::Last);
        assert_eq!(StageRole::of(0, 4), StageRole::First);
        assert_eq!(StageRole::of(1, 4), StageRole::Middle);
        assert_eq!(StageRole::of(2, 4), StageRole::Middle);
        assert_eq!(StageRole::of(3, 4), StageRole::Last);
    }

    #[test]
    fn single_stage_is_never_redirected() {
        let wiring = StageRole::Only.wiring(0);
        assert_eq!(wiring.stdin, None);
        assert_eq!(wiring.stdout, None);
        assert_eq!(wiring.ends().count(), 0);
        assert_eq!(channel_count(1), 0);
    }

    #[test]
    fn first_and_last_keep_one_inherited_stream() {
        let first = StageRole::of(0, 3).wiring(0);
        assert_eq!(first.stdin, None);
        assert_eq!(first.stdout, Some(ChannelEnd::write(0)));

        let last = StageRole::of(2, 3).wiring(2);
        assert_eq!(last.stdin, Some(ChannelEnd::read(1)));
        assert_eq!(last.stdout, None);
    }

    #[test]
    fn middle_reads_previous_and_writes_next() {
        let wiring = StageRole::Middle.wiring(2);
        assert_eq!(wiring.stdin, Some(ChannelEnd::read(1)));
        assert_eq!(wiring.stdout, Some(ChannelEnd::write(2)));
    }

    #[test]
    fn every_end_is_handed_off_exactly_once() {
        for total in 1..10 {
            let mut handed: HashMap<ChannelEnd, usize> = HashMap::new();
            for index in 0..total {
                for end in Wiring::of(index, total).ends() {
                    *handed.entry(end).or_default() += 1;
                }
            }
            assert_eq!(handed.len(), 2 * channel_count(total), "total {}", total);
            for channel in 0..channel_count(total) {
                assert_eq!(handed.get(&ChannelEnd::read(channel)), Some(&1));
                assert_eq!(handed.get(&ChannelEnd::write(channel)), Some(&1));
            }
        }
    }

    #[test]
    fn stage_zero_never_reads_a_channel() {
        for total in 0..6 {
            assert_eq!(Wiring::of(0, total).stdin, None, "total {}", total);
        }
        assert_eq!(StageRole::of(0, 0), StageRole::Only);
    }

    #[test]
    fn index_past_the_end_is_wired_as_last() {
        assert_eq!(StageRole::of(7, 3), StageRole::Last);
        assert_eq!(Wiring::of(7, 3).stdout, None);
    }

    #[test]
    fn writer_precedes_reader() {
        for total in 2..6 {
            for index in 0..total {
                let wiring = Wiring::of(index, total);
                if let Some(end) = wiring.stdin {
                    assert_eq!(end.channel + 1, index);
                }
                if let Some(end) = wiring.stdout {
                    assert_eq!(end.channel, index);
                }
            }
        }
    }
}
