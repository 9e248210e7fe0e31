//! Logical execution roles on the single compositor thread.
//!
//! Main-role and impl-role work run interleaved on one thread. Scopes mark which role is active
//! so role-restricted operations can assert they were reached the right way; nothing here
//! switches threads.

use std::cell::Cell;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Main,
    Impl,
}

#[derive(Debug)]
pub struct RoleTracker {
    current: Cell<Role>,
    main_blocked: Cell<bool>,
}

impl RoleTracker {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            current: Cell::new(Role::Main),
            main_blocked: Cell::new(false),
        })
    }

    pub fn current(&self) -> Role {
        self.current.get()
    }

    pub fn is_main(&self) -> bool {
        self.current.get() == Role::Main
    }

    pub fn is_impl(&self) -> bool {
        self.current.get() == Role::Impl
    }

    /// The main role is parked while impl work runs synchronously on its behalf.
    pub fn is_main_blocked(&self) -> bool {
        self.main_blocked.get()
    }

    pub fn enter(self: &Rc<Self>, role: Role) -> RoleScope {
        let previous = self.current.replace(role);
        RoleScope {
            tracker: Rc::clone(self),
            previous,
        }
    }

    pub fn enter_impl(self: &Rc<Self>) -> RoleScope {
        self.enter(Role::Impl)
    }

    pub fn enter_main(self: &Rc<Self>) -> RoleScope {
        self.enter(Role::Main)
    }

    pub fn block_main(self: &Rc<Self>) -> MainBlockedScope {
        let previous = self.main_blocked.replace(true);
        MainBlockedScope {
            tracker: Rc::clone(self),
            previous,
        }
    }

    #[track_caller]
    pub fn assert_main(&self) {
        debug_assert!(self.is_main(), "main-role operation reached from the impl role");
    }

    #[track_caller]
    pub fn assert_impl(&self) {
        debug_assert!(self.is_impl(), "impl-role operation reached from the main role");
    }
}

/// Restores the previous role on drop.
#[must_use = "the role reverts as soon as the scope is dropped"]
#[derive(Debug)]
pub struct RoleScope {
    tracker: Rc<RoleTracker>,
    previous: Role,
}

impl Drop for RoleScope {
    fn drop(&mut self) {
        self.tracker.current.set(self.previous);
    }
}

#[must_use = "the main role unblocks as soon as the scope is dropped"]
#[derive(Debug)]
pub struct MainBlockedScope {
    tracker: Rc<RoleTracker>,
    previous: bool,
}

impl Drop for MainBlockedScope {
    fn drop(&mut self) {
        self.tracker.main_blocked.set(self.previous);
    }
}
