//! The daisy chain: attached devices in attachment order.

use std::rc::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::device::{DeviceId, IecDevice};
use crate::error::ConfigError;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

fn next_session() -> u64 {
    NEXT_SESSION.fetch_add(1, Ordering::Relaxed)
}

pub struct DaisyEntry {
    pub tag: String,
    pub address: u8,
    pub device: Weak<dyn IecDevice>,
}

pub struct DaisyChain {
    bus: String,
    session: u64,
    entries: Vec<DaisyEntry>,
}

impl DaisyChain {
    pub fn new(bus: &str) -> Self {
        DaisyChain {
            bus: bus.to_string(),
            session: next_session(),
            entries: Vec::new(),
        }
    }

    pub fn attach(
        &mut self,
        tag: &str,
        address: u8,
        device: Weak<dyn IecDevice>,
    ) -> Result<DeviceId, ConfigError> {
        if self.find(tag).is_some() {
            return Err(ConfigError::DuplicateTag {
                bus: self.bus.clone(),
                tag: tag.to_string(),
            });
        }

        self.entries.push(DaisyEntry {
            tag: tag.to_string(),
            address,
            device,
        });

        Ok(DeviceId {
            session: self.session,
            index: self.entries.len() - 1,
        })
    }

    /// Linear scan; chains are a handful of devices long.
    pub fn find(&self, tag: &str) -> Option<DeviceId> {
        self.entries
            .iter()
            .position(|entry| entry.tag == tag)
            .map(|index| DeviceId {
                session: self.session,
                index,
            })
    }

    /// Index of `id` in this chain, if it was issued by the current session.
    pub fn resolve(&self, id: DeviceId) -> Option<usize> {
        (id.session == self.session && id.index < self.entries.len()).then_some(id.index)
    }

    pub fn get(&self, id: DeviceId) -> Option<&DaisyEntry> {
        self.resolve(id).map(|index| &self.entries[index])
    }

    pub fn id_at(&self, index: usize) -> Option<DeviceId> {
        (index < self.entries.len()).then_some(DeviceId {
            session: self.session,
            index,
        })
    }

    pub fn entry_at(&self, index: usize) -> Option<&DaisyEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DaisyEntry> {
        self.entries.iter()
    }

    /// Drops every entry and opens a new session, so ids handed out so far
    /// no longer resolve.
    pub fn clear(&mut self) -> Vec<DaisyEntry> {
        self.session = next_session();
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Port;
    use crate::line::Line;
    use std::rc::Rc;

    struct Dummy(&'static str);

    impl IecDevice for Dummy {
        fn tag(&self) -> &str {
            self.0
        }

        fn on_signal_changed(&self, _port: &Port<'_>, _line: Line, _state: bool) {}
    }

    fn weak(device: &Rc<Dummy>) -> Weak<dyn IecDevice> {
        let device: Rc<dyn IecDevice> = device.clone();
        Rc::downgrade(&device)
    }

    #[test]
    fn test_attach_preserves_order() {
        let devices: Vec<_> = ["a", "b", "c"].iter().map(|t| Rc::new(Dummy(*t))).collect();
        let mut chain = DaisyChain::new("iec");

        for (i, d) in devices.iter().enumerate() {
            let id = chain.attach(d.0, 8 + i as u8, weak(d)).unwrap();
            assert_eq!(id.index(), i);
        }

        let tags: Vec<_> = chain.iter().map(|e| e.tag.as_str()).collect();
        assert_eq!(tags, vec!["a", "b", "c"]);
        assert_eq!(chain.find("b").map(|id| id.index()), Some(1));
        assert_eq!(chain.find("z"), None);
        assert_eq!(chain.get(chain.find("c").unwrap()).unwrap().address, 10);
    }

    #[test]
    fn test_duplicate_tag_rejected() {
        let d = Rc::new(Dummy("drive"));
        let mut chain = DaisyChain::new("iec");
        chain.attach("drive", 8, weak(&d)).unwrap();

        let err = chain.attach("drive", 9, weak(&d)).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTag { .. }));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_ids_from_other_chain_do_not_resolve() {
        let d = Rc::new(Dummy("drive"));
        let mut first = DaisyChain::new("a");
        let mut second = DaisyChain::new("b");
        let id = first.attach("drive", 8, weak(&d)).unwrap();
        second.attach("drive", 8, weak(&d)).unwrap();

        assert_eq!(first.resolve(id), Some(0));
        assert_eq!(second.resolve(id), None);
    }

    #[test]
    fn test_clear_invalidates_ids() {
        let d = Rc::new(Dummy("drive"));
        let mut chain = DaisyChain::new("iec");
        let id = chain.attach("drive", 8, weak(&d)).unwrap();

        let removed = chain.clear();
        assert_eq!(removed.len(), 1);
        assert!(chain.is_empty());

        chain.attach("drive", 8, weak(&d)).unwrap();
        assert_eq!(chain.resolve(id), None);
    }
}
