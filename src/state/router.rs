//! Binding between open connections and the players they speak for.

use std::collections::HashMap;

use crate::state::{
    ConnectionId,
    membership::{PlayerId, Roster},
};

/// Maps each open connection to the player currently bound to it.
#[derive(Debug, Default, Clone)]
pub struct ConnectionRouter {
    bindings: HashMap<ConnectionId, PlayerId>,
}

impl ConnectionRouter {
    /// Router without any binding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Player bound to `connection`, if any.
    pub fn player_for(&self, connection: ConnectionId) -> Option<&PlayerId> {
        self.bindings.get(&connection)
    }

    /// Number of bound connections.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no connection is bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bind `connection` to `player_id`, detaching it from whatever it was bound to before.
    ///
    /// Returns `false` and changes nothing when the player is unknown. Binding the same pair
    /// twice leaves a single entry on both sides.
    pub fn bind(&mut self, roster: &mut Roster, connection: ConnectionId, player_id: &str) -> bool {
        if roster.find_player(player_id).is_none() {
            return false;
        }

        self.unbind(roster, connection);
        let Some(player) = roster.player_mut(player_id) else {
            return false;
        };
        player.attach(connection);
        self.bindings.insert(connection, player_id.to_string());
        true
    }

    /// Drop the binding of `connection` and detach it from its player.
    pub fn unbind(&mut self, roster: &mut Roster, connection: ConnectionId) -> Option<PlayerId> {
        let previous = self.bindings.remove(&connection)?;
        if let Some(player) = roster.player_mut(&previous) {
            player.detach(connection);
        }
        Some(previous)
    }

    /// Drop the binding of `connection` whose player already left the roster.
    pub fn forget(&mut self, connection: ConnectionId) -> Option<PlayerId> {
        self.bindings.remove(&connection)
    }
}
