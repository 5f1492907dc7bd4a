use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind};
use std::path::PathBuf;

/// The three file-level changes the catalog reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Created(PathBuf),
    Removed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

/// Reduce a raw notification to an [`FsEvent`].
///
/// A rename inside the watched tree may arrive as a `From`/`To` pair as well
/// as a combined `Both` event. The halves are treated as a removal and a
/// creation, which converges to the same catalog state as the combined event.
/// A completed write is treated as a creation so files that were still being
/// written when first seen get another chance.
pub fn classify(event: &Event) -> Option<FsEvent> {
    let first = event.paths.first()?.clone();

    match event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => None,
        EventKind::Create(_) => Some(FsEvent::Created(first)),
        EventKind::Remove(_) => Some(FsEvent::Removed(first)),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let to = event.paths.get(1)?.clone();
            Some(FsEvent::Renamed { from: first, to })
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(FsEvent::Removed(first)),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(FsEvent::Created(first)),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(FsEvent::Created(first)),
        _ => None,
    }
}
