//! Named beatmap collections merged from the stable and local dumps.

use crate::database::legacy::collections::{LocalCollection, StableCollection};
use crate::database::models::BeatmapHash;

const UNTITLED: &str = "Untitled collection";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Collection {
    pub name: String,
    /// Effective contents, in display order.
    pub maps: Vec<BeatmapHash>,
    stable_maps: Vec<BeatmapHash>,
    local_maps: Vec<BeatmapHash>,
    deleted_maps: Vec<BeatmapHash>,
}

fn remove_hash(list: &mut Vec<BeatmapHash>, hash: &BeatmapHash) -> bool {
    match list.iter().position(|h| h == hash) {
        Some(i) => {
            list.remove(i);
            true
        }
        None => false,
    }
}

fn push_unique(list: &mut Vec<BeatmapHash>, hash: BeatmapHash) {
    if !list.contains(&hash) {
        list.push(hash);
    }
}

impl Collection {
    pub fn contains(&self, hash: &BeatmapHash) -> bool {
        self.maps.contains(hash)
    }

    pub fn add_map(&mut self, hash: BeatmapHash) {
        remove_hash(&mut self.deleted_maps, &hash);
        push_unique(&mut self.local_maps, hash);
        push_unique(&mut self.maps, hash);
    }

    /// Stable entries cannot be removed from `collection.db`, so they are
    /// remembered as deleted instead.
    pub fn remove_map(&mut self, hash: &BeatmapHash) {
        remove_hash(&mut self.maps, hash);
        remove_hash(&mut self.local_maps, hash);
        if self.stable_maps.contains(hash) {
            push_unique(&mut self.deleted_maps, *hash);
        }
    }

    fn to_local(&self) -> LocalCollection {
        LocalCollection {
            name: self.name.clone(),
            deleted_maps: self.deleted_maps.clone(),
            maps: self.local_maps.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct CollectionStore {
    collections: Vec<Collection>,
}

impl CollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> &[Collection] {
        &self.collections
    }

    pub fn get(&self, name: &str) -> Option<&Collection> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn clear(&mut self) {
        self.collections.clear();
    }

    pub fn get_or_create(&mut self, name: &str) -> &mut Collection {
        let name = if name.is_empty() { UNTITLED } else { name };
        let index = match self.collections.iter().position(|c| c.name == name) {
            Some(i) => i,
            None => {
                self.collections.push(Collection {
                    name: name.to_string(),
                    ..Collection::default()
                });
                self.collections.len() - 1
            }
        };
        &mut self.collections[index]
    }

    pub fn merge_stable(&mut self, stable: Vec<StableCollection>) {
        for entry in stable {
            let collection = self.get_or_create(&entry.name);
            for hash in entry.maps {
                push_unique(&mut collection.stable_maps, hash);
                push_unique(&mut collection.maps, hash);
            }
        }
    }

    /// Applies the local dump on top of the stable collections.
    pub fn merge_local(&mut self, local: Vec<LocalCollection>) {
        for entry in local {
            let collection = self.get_or_create(&entry.name);
            for hash in entry.deleted_maps {
                remove_hash(&mut collection.maps, &hash);
                push_unique(&mut collection.deleted_maps, hash);
            }
            for hash in entry.maps {
                push_unique(&mut collection.local_maps, hash);
                push_unique(&mut collection.maps, hash);
            }
        }
    }

    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        let to = if to.is_empty() { UNTITLED } else { to };
        if from == to {
            return false;
        }
        let Some(index) = self.collections.iter().position(|c| c.name == from) else {
            return false;
        };
        let maps = self.collections[index].maps.clone();
        for hash in &maps {
            self.collections[index].remove_map(hash);
        }
        let target = self.get_or_create(to);
        for hash in maps {
            target.add_map(hash);
        }
        self.prune();
        true
    }

    pub fn delete(&mut self, name: &str) -> bool {
        let Some(collection) = self.collections.iter_mut().find(|c| c.name == name) else {
            return false;
        };
        for hash in collection.maps.clone() {
            collection.remove_map(&hash);
        }
        self.prune();
        true
    }

    /// Drops collections that hold nothing and remember nothing.
    fn prune(&mut self) {
        self.collections
            .retain(|c| !c.maps.is_empty() || !c.deleted_maps.is_empty());
    }

    pub fn to_local(&self) -> Vec<LocalCollection> {
        self.collections.iter().map(Collection::to_local).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u8) -> BeatmapHash {
        BeatmapHash([n; 16])
    }

    fn store_with_stable() -> CollectionStore {
        let mut store = CollectionStore::new();
        store.merge_stable(vec![StableCollection {
            name: "farm".into(),
            maps: vec![h(1), h(2)],
        }]);
        store
    }

    #[test]
    fn removing_a_stable_map_survives_a_reload() {
        let mut store = store_with_stable();
        store.get_or_create("farm").remove_map(&h(1));
        store.get_or_create("farm").add_map(h(3));
        let saved = store.to_local();

        let mut reloaded = store_with_stable();
        reloaded.merge_local(saved);
        let farm = reloaded.get("farm").unwrap();
        assert_eq!(farm.maps, vec![h(2), h(3)]);
    }

    #[test]
    fn re_adding_clears_the_deleted_mark() {
        let mut store = store_with_stable();
        let farm = store.get_or_create("farm");
        farm.remove_map(&h(1));
        farm.add_map(h(1));
        assert!(store.to_local()[0].deleted_maps.is_empty());
    }

    #[test]
    fn rename_moves_maps() {
        let mut store = CollectionStore::new();
        store.get_or_create("old").add_map(h(5));
        assert!(store.rename("old", "new"));
        assert!(store.get("old").is_none());
        assert!(store.get("new").unwrap().contains(&h(5)));
    }

    #[test]
    fn empty_names_become_untitled() {
        let mut store = CollectionStore::new();
        store.get_or_create("").add_map(h(1));
        assert!(store.get(UNTITLED).is_some());
    }

    #[test]
    fn deleting_local_collection_removes_it() {
        let mut store = CollectionStore::new();
        store.get_or_create("tmp").add_map(h(1));
        assert!(store.delete("tmp"));
        assert!(store.all().is_empty());
        assert!(!store.delete("tmp"));
    }
}
