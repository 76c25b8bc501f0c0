use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    rc::{Rc, Weak},
};

/// A name was defined twice in the same frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redefinition(pub String);

struct Frame<V> {
    parent: Option<Parent<V>>,
    bindings: RefCell<HashMap<String, V>>,
}

enum Parent<V> {
    Shared(Scope<V>),
    /// Kept alive by the child's handles instead. See [`Scope::detached_child`].
    Weak(WeakScope<V>),
}

/// A chain of name bindings. Cloning a `Scope` yields another handle to the
/// same frame, so closures and objects can keep their defining scope alive
/// after the block that created it has finished.
///
/// Used with `V = Type` by the analyzer and `V = RuntimeValue` by the
/// evaluator.
pub struct Scope<V> {
    frame: Rc<Frame<V>>,
    /// Strong hold on the parent when the frame links to it weakly.
    anchor: Option<Box<Scope<V>>>,
}

/// A handle that does not keep its frame alive.
pub struct WeakScope<V>(Weak<Frame<V>>);

impl<V> Clone for WeakScope<V> {
    fn clone(&self) -> Self {
        WeakScope(Weak::clone(&self.0))
    }
}

impl<V> WeakScope<V> {
    pub fn upgrade(&self) -> Option<Scope<V>> {
        self.0.upgrade().map(Scope::from_frame)
    }
}

impl<V> Clone for Scope<V> {
    fn clone(&self) -> Self {
        Scope {
            frame: Rc::clone(&self.frame),
            anchor: self.anchor.clone(),
        }
    }
}

impl<V> Default for Scope<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Scope<V> {
    /// A root scope with no parent.
    pub fn new() -> Self {
        Scope {
            frame: Rc::new(Frame {
                parent: None,
                bindings: RefCell::new(HashMap::new()),
            }),
            anchor: None,
        }
    }

    /// A handle to `frame`, holding its weakly linked parent if it has one.
    fn from_frame(frame: Rc<Frame<V>>) -> Self {
        let anchor = match &frame.parent {
            Some(Parent::Weak(parent)) => parent.upgrade().map(Box::new),
            _ => None,
        };
        Scope { frame, anchor }
    }

    pub fn child(&self) -> Self {
        Scope {
            frame: Rc::new(Frame {
                parent: Some(Parent::Shared(self.clone())),
                bindings: RefCell::new(HashMap::new()),
            }),
            anchor: None,
        }
    }

    /// A child whose frame links to `self` weakly. Handles to the child keep
    /// `self` alive, except those released with [`Scope::released_from`]
    /// for storage inside `self`, which would otherwise form a cycle.
    pub fn detached_child(&self) -> Self {
        Scope {
            frame: Rc::new(Frame {
                parent: Some(Parent::Weak(self.downgrade())),
                bindings: RefCell::new(HashMap::new()),
            }),
            anchor: Some(Box::new(self.clone())),
        }
    }

    pub fn parent(&self) -> Option<Scope<V>> {
        match self.frame.parent.as_ref()? {
            Parent::Shared(parent) => Some(parent.clone()),
            Parent::Weak(parent) => parent.upgrade(),
        }
    }

    /// This frame followed by each enclosing frame.
    fn frames(&self) -> impl Iterator<Item = Scope<V>> {
        std::iter::successors(Some(self.clone()), Scope::parent)
    }

    /// This handle without its hold on `frame`, for storing inside `frame`.
    /// `None` when the handle does not hold `frame`.
    pub fn released_from(&self, frame: &Scope<V>) -> Option<Scope<V>> {
        match &self.anchor {
            Some(anchor) if anchor.ptr_eq(frame) => Some(Scope {
                frame: Rc::clone(&self.frame),
                anchor: None,
            }),
            _ => None,
        }
    }

    /// Undoes [`Scope::released_from`].
    pub fn anchored(&self) -> Scope<V> {
        match self.anchor {
            Some(_) => self.clone(),
            None => Scope::from_frame(Rc::clone(&self.frame)),
        }
    }

    /// Binds `name` in this frame. Shadowing an outer binding is fine;
    /// rebinding a name already in this frame is not.
    pub fn define(&self, name: impl Into<String>, value: V) -> Result<(), Redefinition> {
        let name = name.into();
        let mut bindings = self.frame.bindings.borrow_mut();
        if bindings.contains_key(&name) {
            return Err(Redefinition(name));
        }
        bindings.insert(name, value);
        Ok(())
    }

    /// Overwrites the nearest existing binding of `name`. Returns false when
    /// no frame in the chain binds it.
    pub fn set(&self, name: &str, value: V) -> bool {
        match self.frame_of(name) {
            Some(frame) => {
                frame.frame.bindings.borrow_mut().insert(name.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// The nearest frame in the chain that binds `name`.
    pub fn frame_of(&self, name: &str) -> Option<Scope<V>> {
        self.frames()
            .find(|frame| frame.frame.bindings.borrow().contains_key(name))
    }

    pub fn contains(&self, name: &str, current_only: bool) -> bool {
        if current_only {
            self.frame.bindings.borrow().contains_key(name)
        } else {
            self.frame_of(name).is_some()
        }
    }

    /// Names bound directly in this frame, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.frame.bindings.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn ptr_eq(&self, other: &Scope<V>) -> bool {
        Rc::ptr_eq(&self.frame, &other.frame)
    }

    pub fn downgrade(&self) -> WeakScope<V> {
        WeakScope(Rc::downgrade(&self.frame))
    }
}

impl<V: Clone> Scope<V> {
    /// Looks `name` up in this frame, then (unless `current_only`) in each
    /// enclosing frame in turn.
    pub fn get(&self, name: &str, current_only: bool) -> Option<V> {
        for frame in self.frames() {
            let found = frame.frame.bindings.borrow().get(name).cloned();
            if found.is_some() || current_only {
                return found;
            }
        }
        None
    }
}

// Only the own frame's names are printed: bindings can refer back to this
// scope through closures, so printing values could recurse forever.
impl<V> fmt::Debug for Scope<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("names", &self.names())
            .field("has_parent", &self.frame.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_and_lookup() {
        let root: Scope<i32> = Scope::new();
        root.define("a", 1).unwrap();
        assert_eq!(root.get("a", false), Some(1));
        assert_eq!(root.get("b", false), None);
        assert_eq!(root.define("a", 2), Err(Redefinition("a".into())));
        assert_eq!(root.get("a", true), Some(1));
    }

    #[test]
    fn child_frames_shadow_and_see_outward() {
        let root: Scope<i32> = Scope::new();
        root.define("a", 1).unwrap();

        let child = root.child();
        assert_eq!(child.get("a", false), Some(1));
        assert_eq!(child.get("a", true), None);

        child.define("a", 2).unwrap();
        assert_eq!(child.get("a", false), Some(2));
        assert_eq!(root.get("a", false), Some(1));
    }

    #[test]
    fn set_updates_nearest_binding() {
        let root: Scope<i32> = Scope::new();
        root.define("a", 1).unwrap();
        let child = root.child();

        assert!(child.set("a", 5));
        assert_eq!(root.get("a", false), Some(5));
        assert!(!child.set("missing", 0));
        assert!(!child.contains("missing", false));
    }

    #[test]
    fn handles_share_frames() {
        let root: Scope<i32> = Scope::new();
        let alias = root.clone();
        alias.define("x", 3).unwrap();

        assert!(root.ptr_eq(&alias));
        assert!(!root.ptr_eq(&root.child()));
        assert_eq!(root.get("x", true), Some(3));
        assert_eq!(root.names(), vec!["x".to_string()]);
    }

    #[test]
    fn frame_of_finds_the_binding_frame() {
        let root: Scope<i32> = Scope::new();
        root.define("a", 1).unwrap();
        let child = root.child();
        child.define("b", 2).unwrap();

        assert!(child.frame_of("a").is_some_and(|frame| frame.ptr_eq(&root)));
        assert!(child.frame_of("b").is_some_and(|frame| frame.ptr_eq(&child)));
        assert!(child.frame_of("c").is_none());
    }

    #[test]
    fn weak_handles_do_not_keep_frames_alive() {
        let root: Scope<i32> = Scope::new();
        let weak = root.downgrade();
        assert!(weak.upgrade().is_some_and(|frame| frame.ptr_eq(&root)));

        drop(root);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn detached_children_hold_their_parent() {
        let root: Scope<i32> = Scope::new();
        root.define("a", 1).unwrap();
        let outer = root.child();
        let weak_outer = outer.downgrade();

        let members = outer.detached_child();
        drop(outer);
        assert_eq!(members.get("a", false), Some(1));
        assert!(weak_outer.upgrade().is_some());

        let released = members.released_from(&weak_outer.upgrade().unwrap()).unwrap();
        assert!(released.released_from(&root).is_none());
        drop(members);
        assert!(weak_outer.upgrade().is_none());
        assert!(released.parent().is_none());
    }

    #[test]
    fn anchored_restores_the_hold() {
        let outer: Scope<i32> = Scope::new();
        outer.define("a", 1).unwrap();
        let members = outer.detached_child();
        let released = members.released_from(&outer).unwrap();
        drop(members);

        let anchored = released.anchored();
        let weak_outer = outer.downgrade();
        drop(outer);
        assert!(weak_outer.upgrade().is_some());
        assert_eq!(anchored.get("a", false), Some(1));
    }
}
