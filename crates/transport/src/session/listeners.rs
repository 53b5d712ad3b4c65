/// Revocation handle returned by `subscribe`. Deliberately not `Clone`: the
/// holder is the only one able to unsubscribe.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "dropping the token makes the listener impossible to remove"]
pub struct ListenerToken {
    id: u64,
}

type Listener<E> = Box<dyn FnMut(&E)>;

/// Ordered set of event listeners owned by a session.
pub(crate) struct Listeners<E> {
    next_id: u64,
    entries: Vec<(u64, Listener<E>)>,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }
}

impl<E> Listeners<E> {
    pub fn subscribe(&mut self, listener: impl FnMut(&E) + 'static) -> ListenerToken {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, Box::new(listener)));
        ListenerToken { id }
    }

    pub fn unsubscribe(&mut self, token: ListenerToken) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(id, _)| *id != token.id);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn emit(&mut self, event: &E) {
        for (_, listener) in self.entries.iter_mut() {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
