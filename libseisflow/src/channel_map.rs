// Channel coordinates come from a CSV file with a header line and one row per channel:
// id,x,y,z[,gain]
// Coordinates are meters in the local Cartesian frame of the project. The gain column is
// optional and may be left empty for individual rows.
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::error::ChannelMapError;

const MIN_ENTRIES_PER_LINE: usize = 4; //id, x, y, z
const MAX_ENTRIES_PER_LINE: usize = 5; //id, x, y, z, gain

/// A sensor channel and where it sits
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: String,
    pub coordinates: [f64; 3],
    pub gain: Option<f64>,
}

/// ChannelMap holds the coordinates (and optional gain) of every channel of a project.
///
/// Channels are immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelMap {
    map: BTreeMap<String, Channel>,
}

impl ChannelMap {
    /// Read a channel map from a CSV file
    pub fn new(path: &Path) -> Result<Self, ChannelMapError> {
        let mut contents = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut contents)?;
        Self::parse(&contents)
    }

    /// Parse the CSV contents; the first line is a header
    pub fn parse(contents: &str) -> Result<Self, ChannelMapError> {
        let mut cm = ChannelMap::default();
        let mut lines = contents.lines();
        lines.next(); // Skip the header
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let entries: Vec<&str> = line.split_terminator(',').map(|e| e.trim()).collect();
            if entries.len() < MIN_ENTRIES_PER_LINE || entries.len() > MAX_ENTRIES_PER_LINE {
                return Err(ChannelMapError::BadFileFormat(line.to_string()));
            }
            let gain = match entries.get(4) {
                Some(g) if !g.is_empty() => Some(g.parse()?),
                _ => None,
            };
            let channel = Channel {
                id: entries[0].to_string(),
                coordinates: [entries[1].parse()?, entries[2].parse()?, entries[3].parse()?],
                gain,
            };
            if cm.map.contains_key(&channel.id) {
                return Err(ChannelMapError::DuplicateChannel(channel.id));
            }
            cm.map.insert(channel.id.clone(), channel);
        }
        Ok(cm)
    }

    pub fn from_channels(channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            map: channels.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }

    pub fn get(&self, channel_id: &str) -> Option<&Channel> {
        self.map.get(channel_id)
    }

    /// If returns None the channel does not exist in the map
    pub fn coordinates(&self, channel_id: &str) -> Option<[f64; 3]> {
        self.map.get(channel_id).map(|c| c.coordinates)
    }

    /// Sorted channel ids
    pub fn ids(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
