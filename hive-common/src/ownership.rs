// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::sync::SpinLock;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OwnershipError {
    #[error("owner is no longer alive and cannot be borrowed")]
    BorrowFailed,
}

/// State shared between an owner, its borrowers and its references.
struct OwnershipState {
    /// count of live borrows
    borrows: AtomicUsize,
    /// flips to false once the owner's destructor has run
    alive: AtomicBool,
    lock: SpinLock,
}

struct OwnedCell<T> {
    state: OwnershipState,
    value: T,
}

impl<T> OwnedCell<T> {
    fn new(value: T) -> Self {
        Self {
            state: OwnershipState {
                borrows: AtomicUsize::new(0),
                alive: AtomicBool::new(true),
                lock: SpinLock::new(),
            },
            value,
        }
    }
}

/// Exclusive ownership over a value that can temporarily be lent out to other
/// parties (tasks, threads, subsystems) without giving the ownership away.
///
/// A [`Borrower`] is a counted, scoped access to the owned value and cannot
/// outlive its `Owner`: dropping the `Owner` blocks until every borrower has
/// been dropped. Keep borrows short-lived; long-term users should hold a
/// [`Reference`] instead and upgrade it when access is needed.
pub struct Owner<T> {
    cell: Arc<OwnedCell<T>>,
}

impl<T> Owner<T> {
    pub fn new(value: T) -> Self {
        Self {
            cell: Arc::new(OwnedCell::new(value)),
        }
    }

    /// Constructs a value that needs a [`Reference`] to itself, e.g. to hand
    /// out in callbacks it schedules. The reference is dead until `new_cyclic`
    /// returns.
    pub fn new_cyclic<F>(f: F) -> Self
    where
        F: FnOnce(Reference<T>) -> T,
    {
        Self {
            cell: Arc::new_cyclic(|weak| OwnedCell::new(f(Reference { cell: weak.clone() }))),
        }
    }

    pub fn borrow(&self) -> Borrower<T> {
        let _guard = self.cell.state.lock.lock();
        self.cell.state.borrows.fetch_add(1, Ordering::Relaxed);
        Borrower {
            cell: self.cell.clone(),
        }
    }

    pub fn create_reference(&self) -> Reference<T> {
        Reference {
            cell: Arc::downgrade(&self.cell),
        }
    }
}

impl<T> Deref for Owner<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.cell.value
    }
}

impl<T> Drop for Owner<T> {
    /// Blocks until all borrows have been returned, then marks the state dead.
    fn drop(&mut self) {
        loop {
            let guard = self.cell.state.lock.lock();
            if self.cell.state.borrows.load(Ordering::Acquire) == 0 {
                self.cell.state.alive.store(false, Ordering::Release);
                drop(guard);
                break;
            }
            drop(guard);
            std::thread::yield_now();
        }
    }
}

/// A counted, scoped access to an [`Owner`]'s value. Its existence blocks the
/// owner's destructor.
pub struct Borrower<T> {
    cell: Arc<OwnedCell<T>>,
}

impl<T> Borrower<T> {
    pub fn to_reference(&self) -> Reference<T> {
        Reference {
            cell: Arc::downgrade(&self.cell),
        }
    }
}

impl<T> Clone for Borrower<T> {
    fn clone(&self) -> Self {
        self.cell.state.borrows.fetch_add(1, Ordering::Relaxed);
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T> Deref for Borrower<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.cell.value
    }
}

impl<T> Drop for Borrower<T> {
    fn drop(&mut self) {
        self.cell.state.borrows.fetch_sub(1, Ordering::Release);
    }
}

/// A weak handle to an [`Owner`]'s value. It may outlive the owner and must
/// be upgraded to a [`Borrower`] before the value can be accessed; upgrading
/// fails once the owner has been destroyed.
pub struct Reference<T> {
    cell: Weak<OwnedCell<T>>,
}

impl<T> Reference<T> {
    /// A reference that never upgrades. Useful as a placeholder.
    pub fn dangling() -> Self {
        Self { cell: Weak::new() }
    }

    pub fn can_borrow(&self) -> bool {
        match self.cell.upgrade() {
            Some(cell) => cell.state.alive.load(Ordering::Acquire),
            None => false,
        }
    }

    pub fn try_borrow(&self) -> Option<Borrower<T>> {
        let cell = self.cell.upgrade()?;
        let _guard = cell.state.lock.lock();
        if cell.state.alive.load(Ordering::Acquire) {
            cell.state.borrows.fetch_add(1, Ordering::Relaxed);
            drop(_guard);
            Some(Borrower { cell })
        } else {
            None
        }
    }

    pub fn borrow(&self) -> Result<Borrower<T>, OwnershipError> {
        self.try_borrow().ok_or(OwnershipError::BorrowFailed)
    }
}

impl<T> Clone for Reference<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use test_r::test;

    struct Payload {
        value: i32,
    }

    #[test]
    fn borrow_gives_access_to_the_owned_value() {
        let owner = Owner::new(Payload { value: 42 });
        let borrower = owner.borrow();
        assert_eq!(borrower.value, 42);
        assert_eq!(owner.value, 42);
    }

    #[test]
    fn reference_upgrade_fails_after_owner_destruction() {
        let owner = Owner::new(Payload { value: 1 });
        let reference = owner.create_reference();
        assert!(reference.can_borrow());
        assert!(reference.try_borrow().is_some());

        drop(owner);

        assert!(!reference.can_borrow());
        assert!(reference.try_borrow().is_none());
        assert_eq!(reference.borrow().err(), Some(OwnershipError::BorrowFailed));
    }

    #[test]
    fn owner_destruction_blocks_on_live_borrowers() {
        let owner = Owner::new(Payload { value: 7 });
        let borrower = owner.borrow();

        let released = Arc::new(AtomicBool::new(false));
        let released_clone = released.clone();

        let handle = std::thread::spawn(move || {
            drop(owner);
            released_clone.store(true, Ordering::SeqCst);
        });

        // the owner's destructor must spin while the borrow is alive
        std::thread::sleep(Duration::from_millis(100));
        assert!(!released.load(Ordering::SeqCst));
        assert_eq!(borrower.value, 7);

        drop(borrower);
        handle.join().unwrap();
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn borrower_can_be_turned_into_a_reference() {
        let owner = Owner::new(Payload { value: 3 });
        let reference = owner.borrow().to_reference();
        assert_eq!(reference.borrow().unwrap().value, 3);
    }

    struct SelfAware {
        self_reference: Reference<SelfAware>,
    }

    #[test]
    fn new_cyclic_seeds_a_self_reference() {
        let owner = Owner::new_cyclic(|self_reference| SelfAware { self_reference });
        let borrowed_via_self = owner.self_reference.borrow().unwrap();
        assert!(borrowed_via_self.self_reference.can_borrow());
        drop(borrowed_via_self);
    }

    #[test]
    fn dangling_reference_never_borrows() {
        let reference: Reference<Payload> = Reference::dangling();
        assert!(!reference.can_borrow());
        assert!(reference.try_borrow().is_none());
    }
}
