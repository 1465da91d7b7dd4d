use std::path::{Path, PathBuf};

use super::error::StoreError;
use super::event::Event;
use super::timestamp::Timestamp;

/// Sink for located events
pub trait EventStore: Send {
    fn add_event(&mut self, event: Event) -> Result<(), StoreError>;
    fn events(&self) -> Result<Vec<Event>, StoreError>;
}

/// Keeps events in memory, in insertion order
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: Vec<Event>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryStore {
    fn add_event(&mut self, event: Event) -> Result<(), StoreError> {
        self.events.push(event);
        Ok(())
    }

    fn events(&self) -> Result<Vec<Event>, StoreError> {
        Ok(self.events.clone())
    }
}

/// One YAML file per event in a folder. Adding an event with a known id overwrites it.
#[derive(Debug)]
pub struct YamlFolderStore {
    folder: PathBuf,
}

impl YamlFolderStore {
    pub fn new(folder: &Path) -> Result<Self, StoreError> {
        if !folder.exists() {
            std::fs::create_dir_all(folder)?;
        }
        Ok(Self {
            folder: folder.to_path_buf(),
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    fn event_path(&self, event: &Event) -> PathBuf {
        let name: String = event
            .resource_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.folder.join(format!("{name}.yaml"))
    }
}

fn event_time(event: &Event) -> Option<Timestamp> {
    match event.preferred_origin() {
        Some(origin) => Some(origin.time),
        None => event.picks.iter().map(|p| p.time).min(),
    }
}

impl EventStore for YamlFolderStore {
    fn add_event(&mut self, event: Event) -> Result<(), StoreError> {
        let path = self.event_path(&event);
        let file = std::fs::File::create(&path)?;
        serde_yaml::to_writer(file, &event)?;
        spdlog::debug!("Wrote {} to {}", event.resource_id, path.display());
        Ok(())
    }

    /// Every stored event, ordered by time
    fn events(&self) -> Result<Vec<Event>, StoreError> {
        let mut events = Vec::new();
        for entry in std::fs::read_dir(&self.folder)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "yaml") {
                let contents = std::fs::read_to_string(&path)?;
                events.push(serde_yaml::from_str::<Event>(&contents)?);
            }
        }
        events.sort_by_key(event_time);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::super::classifier::Classification;
    use super::super::event::{Phase, Pick};
    use super::*;

    fn event_at(seconds: f64) -> Event {
        let picks = vec![Pick::new(
            "GRM.001.001.001",
            Some(Phase::P),
            Timestamp::from_seconds(seconds),
            "manual",
        )];
        Event::new(picks, Some(Classification::Passive))
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryStore::new();
        store.add_event(event_at(2.0)).unwrap();
        store.add_event(event_at(1.0)).unwrap();
        let events = store.events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].picks[0].time, Timestamp::from_seconds(2.0));
    }

    #[test]
    fn test_yaml_folder_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = YamlFolderStore::new(&dir.path().join("events")).unwrap();
        let late = event_at(20.0);
        let early = event_at(10.0);
        store.add_event(late.clone()).unwrap();
        store.add_event(early.clone()).unwrap();
        // Same id replaces the file
        store.add_event(early.clone()).unwrap();

        let events = store.events().unwrap();
        assert_eq!(events, vec![early, late]);
        let n_files = std::fs::read_dir(store.folder()).unwrap().count();
        assert_eq!(n_files, 2);
    }
}
