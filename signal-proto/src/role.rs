//! Connection roles and the query parameters that select them.

/// Group key used when a connection does not name one.
pub const DEFAULT_ROOM: &str = "default";

/// Query-string value of `type` that claims the publisher role.
pub const STREAMER_PARAM: &str = "streamer";

/// Role of a connection within its room, fixed for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The single connection allowed to broadcast to every subscriber.
    Publisher,
    /// Sends to, and receives from, the room's publisher only.
    Subscriber,
}

impl Role {
    /// Maps the `type` query parameter to a role.
    ///
    /// Only `"streamer"` selects [`Role::Publisher`]; any other value, or no
    /// value at all, selects [`Role::Subscriber`].
    #[must_use]
    pub fn from_param(param: Option<&str>) -> Self {
        match param {
            Some(STREAMER_PARAM) => Self::Publisher,
            _ => Self::Subscriber,
        }
    }

    /// Name used for this role in logs and on the status page.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Publisher => "streamer",
            Self::Subscriber => "viewer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Parameters carried by the WebSocket upgrade request (`/ws?room=..&type=..`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectParams {
    /// Group key. Absent means [`DEFAULT_ROOM`].
    pub room: Option<String>,
    /// Requested role (`type` in the query), `"streamer"` or anything else.
    pub client_type: Option<String>,
}

impl ConnectParams {
    /// Builds parameters from decoded query pairs.
    ///
    /// The first occurrence of `room` and of `type` wins; later repeats and
    /// unknown keys are ignored.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_ref() {
                "room" => &mut params.room,
                "type" => &mut params.client_type,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into());
            }
        }
        params
    }

    /// Returns the group key, falling back to [`DEFAULT_ROOM`].
    ///
    /// A present but empty `room` is kept as-is.
    #[must_use]
    pub fn room(&self) -> &str {
        self.room.as_deref().unwrap_or(DEFAULT_ROOM)
    }

    /// Returns the role requested by the `type` parameter.
    #[must_use]
    pub fn role(&self) -> Role {
        Role::from_param(self.client_type.as_deref())
    }
}
