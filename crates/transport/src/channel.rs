use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

/// Reliability and ordering guarantee applied to a message by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum DeliveryMode {
    /// Delivered, possibly out of order. Duplicates are filtered.
    ReliableUnordered,
    /// May be lost; anything older than the newest delivered message is dropped.
    Sequenced,
    /// Delivered exactly once, in send order.
    ReliableOrdered,
    /// Only the newest message is guaranteed to arrive.
    ReliableSequenced,
    /// May be lost, duplicated, or reordered.
    Unreliable,
}

impl DeliveryMode {
    pub const ALL: [DeliveryMode; 5] = [
        DeliveryMode::ReliableUnordered,
        DeliveryMode::Sequenced,
        DeliveryMode::ReliableOrdered,
        DeliveryMode::ReliableSequenced,
        DeliveryMode::Unreliable,
    ];

    pub fn is_reliable(&self) -> bool {
        matches!(
            self,
            Self::ReliableUnordered | Self::ReliableOrdered | Self::ReliableSequenced
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReliableUnordered => "reliable-unordered",
            Self::Sequenced => "sequenced",
            Self::ReliableOrdered => "reliable-ordered",
            Self::ReliableSequenced => "reliable-sequenced",
            Self::Unreliable => "unreliable",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel {channel} is out of range (table has {len} channels)")]
    InvalidChannel { channel: usize, len: usize },
    #[error("delivery mode {0} is not mapped to any channel")]
    UnknownMode(DeliveryMode),
    #[error("channel table must contain at least one channel")]
    Empty,
    #[error("delivery mode {0} is used by more than one channel")]
    DuplicateMode(DeliveryMode),
}

/// Maps application channel ids (the index) to delivery modes.
///
/// Built once from configuration and read-only afterwards. Each mode appears
/// at most once, so the mapping is invertible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTable {
    modes: Vec<DeliveryMode>,
}

impl ChannelTable {
    pub fn new(modes: Vec<DeliveryMode>) -> Result<Self, ChannelError> {
        if modes.is_empty() {
            return Err(ChannelError::Empty);
        }

        for (i, mode) in modes.iter().enumerate() {
            if modes[..i].contains(mode) {
                return Err(ChannelError::DuplicateMode(*mode));
            }
        }

        Ok(Self { modes })
    }

    pub fn resolve(&self, channel: usize) -> Result<DeliveryMode, ChannelError> {
        self.modes
            .get(channel)
            .copied()
            .ok_or(ChannelError::InvalidChannel {
                channel,
                len: self.modes.len(),
            })
    }

    pub fn index_of(&self, mode: DeliveryMode) -> Result<usize, ChannelError> {
        self.modes
            .iter()
            .position(|m| *m == mode)
            .ok_or(ChannelError::UnknownMode(mode))
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self {
            modes: vec![DeliveryMode::ReliableOrdered, DeliveryMode::Unreliable],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_table() {
        let table = ChannelTable::default();
        assert_eq!(table.resolve(0), Ok(DeliveryMode::ReliableOrdered));
        assert_eq!(table.resolve(1), Ok(DeliveryMode::Unreliable));
        assert_eq!(table.index_of(DeliveryMode::Unreliable), Ok(1));
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(ChannelTable::new(Vec::new()), Err(ChannelError::Empty));
    }

    #[test]
    fn test_rejects_duplicates() {
        let result = ChannelTable::new(vec![
            DeliveryMode::ReliableOrdered,
            DeliveryMode::Unreliable,
            DeliveryMode::ReliableOrdered,
        ]);
        assert_eq!(
            result,
            Err(ChannelError::DuplicateMode(DeliveryMode::ReliableOrdered))
        );
    }

    #[test]
    fn test_lookup_misses() {
        let table = ChannelTable::new(vec![DeliveryMode::Unreliable]).unwrap();
        assert_eq!(
            table.resolve(1),
            Err(ChannelError::InvalidChannel { channel: 1, len: 1 })
        );
        assert_eq!(
            table.index_of(DeliveryMode::Sequenced),
            Err(ChannelError::UnknownMode(DeliveryMode::Sequenced))
        );
    }

    fn unique_modes() -> impl Strategy<Value = Vec<DeliveryMode>> {
        Just(DeliveryMode::ALL.to_vec())
            .prop_shuffle()
            .prop_flat_map(|modes| (1..=modes.len()).prop_map(move |n| modes[..n].to_vec()))
    }

    proptest! {
        #[test]
        fn resolve_and_index_of_are_inverses(modes in unique_modes()) {
            let table = ChannelTable::new(modes.clone()).unwrap();
            for channel in 0..table.len() {
                let mode = table.resolve(channel).unwrap();
                prop_assert_eq!(table.index_of(mode).unwrap(), channel);
            }
            for mode in modes {
                let channel = table.index_of(mode).unwrap();
                prop_assert_eq!(table.resolve(channel).unwrap(), mode);
            }
        }

        #[test]
        fn duplicated_mode_always_rejected(
            modes in unique_modes(),
            pick in any::<prop::sample::Index>(),
        ) {
            let mut modes = modes;
            let dup = modes[pick.index(modes.len())];
            modes.push(dup);
            prop_assert!(ChannelTable::new(modes).is_err());
        }
    }
}
