use spaceshare_core::protocol::{FileView, SpaceEvent};
use uuid::Uuid;

/// What a client must do after applying an event to its local view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// The view is up to date.
    Applied,
    RefetchMembers,
    RefetchActivity,
}

/// Client-side copy of a space's file list.
///
/// Events are applied idempotently: a duplicate or late `FileUpserted`
/// replaces the entry with the same id, and a delete for an unknown id is
/// ignored. Membership and activity events only tell the client to refetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpaceView {
    files: Vec<FileView>,
}

impl SpaceView {
    #[must_use]
    pub fn new(files: Vec<FileView>) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[FileView] {
        &self.files
    }

    #[must_use]
    pub fn file(&self, id: Uuid) -> Option<&FileView> {
        self.files.iter().find(|file| file.id == id)
    }

    /// Replaces the whole list with a freshly fetched one.
    pub fn replace_files(&mut self, files: Vec<FileView>) {
        self.files = files;
    }

    pub fn apply(&mut self, event: &SpaceEvent) -> Reconcile {
        match event {
            SpaceEvent::FileUpserted(file) => {
                self.upsert(file.clone());
                Reconcile::Applied
            }
            SpaceEvent::FileDeleted { id } => {
                self.files.retain(|file| file.id != *id);
                Reconcile::Applied
            }
            SpaceEvent::MembershipChanged => Reconcile::RefetchMembers,
            SpaceEvent::ActivityAppended { .. } => Reconcile::RefetchActivity,
        }
    }

    fn upsert(&mut self, file: FileView) {
        match self.files.iter_mut().find(|existing| existing.id == file.id) {
            Some(existing) => *existing = file,
            None => self.files.insert(0, file),
        }
    }
}
