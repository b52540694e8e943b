//! # auth
//!
//! Tracks authenticated users in the shared [`statestore::State`] under the
//! `auth` key and hands out authenticators for store access.
//!
//! All functions take a [`StateGuard`], so the caller holds the store lock
//! for the whole read-modify-write. User ids come from `last-id` inside the
//! persisted table and are never reused, even after a user is removed.

pub mod authenticator;
pub mod error;

pub use authenticator::{Authenticator, MacaroonAuthenticator};
pub use error::{Error, Result};

use serde::{Deserialize, Serialize};
use statestore::StateGuard;

/// State key holding the [`AuthState`] table
pub const AUTH_KEY: &str = "auth";

/// Authenticated users as tracked in state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthState {
    pub last_id: u64,
    #[serde(default)]
    pub users: Vec<UserState>,
}

/// A single authenticated user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserState {
    pub id: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub macaroon: String,
    /// Always kept sorted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discharges: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub store_macaroon: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub store_discharges: Vec<String>,
}

impl UserState {
    /// Authenticator for store requests made on this user's behalf
    pub fn authenticator(&self) -> MacaroonAuthenticator {
        MacaroonAuthenticator::new(self.store_macaroon.clone(), self.store_discharges.clone())
    }

    fn has_credentials(&self, macaroon: &str, sorted_discharges: &[String]) -> bool {
        self.macaroon == macaroon && self.discharges == sorted_discharges
    }
}

/// Load the auth table, treating "never written" as "no users yet"
fn load(st: &StateGuard<'_>) -> Result<AuthState> {
    match st.get(AUTH_KEY) {
        Ok(auth) => Ok(auth),
        Err(e) if e.is_no_state() => Ok(AuthState::default()),
        Err(e) => Err(e.into()),
    }
}

/// Track a new authenticated user and save it in the state
pub fn new_user(
    st: &mut StateGuard<'_>,
    username: &str,
    macaroon: &str,
    mut discharges: Vec<String>,
) -> Result<UserState> {
    let mut auth = load(st)?;

    discharges.sort();
    auth.last_id += 1;
    let user = UserState {
        id: auth.last_id,
        username: username.to_string(),
        macaroon: macaroon.to_string(),
        discharges: discharges.clone(),
        store_macaroon: macaroon.to_string(),
        store_discharges: discharges,
    };
    auth.users.push(user.clone());

    st.set(AUTH_KEY, &auth)?;
    log::info!("Added user {} ({})", user.id, user.username);
    Ok(user)
}

/// Remove a user given its id
///
/// Order among the remaining users is not preserved.
pub fn remove_user(st: &mut StateGuard<'_>, id: u64) -> Result<()> {
    let mut auth = load(st)?;

    let index = auth
        .users
        .iter()
        .position(|user| user.id == id)
        .ok_or(Error::InvalidUser { id })?;
    auth.users.swap_remove(index);

    st.set(AUTH_KEY, &auth)?;
    log::info!("Removed user {id}");
    Ok(())
}

/// Look up a user given its id
pub fn user(st: &StateGuard<'_>, id: u64) -> Result<UserState> {
    load(st)?
        .users
        .into_iter()
        .find(|user| user.id == id)
        .ok_or(Error::InvalidUser { id })
}

/// Find the user owning the given macaroon and discharges
///
/// Discharges are compared as a set. The caller's slice is left untouched;
/// a sorted copy is used for the comparison.
pub fn check_macaroon(
    st: &StateGuard<'_>,
    macaroon: &str,
    discharges: &[String],
) -> Result<UserState> {
    let auth: AuthState = match st.get(AUTH_KEY) {
        Ok(auth) => auth,
        Err(e) if e.is_no_state() => return Err(Error::InvalidAuth),
        Err(e) => return Err(e.into()),
    };

    let mut sorted = discharges.to_vec();
    sorted.sort();

    auth.users
        .into_iter()
        .find(|user| user.has_credentials(macaroon, &sorted))
        .ok_or(Error::InvalidAuth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use statestore::State;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_user_sorts_discharges_and_stores() {
        let state = State::in_memory();
        let mut st = state.lock();

        let user = new_user(&mut st, "alice", "m1", strings(&["zz", "aa", "mm"])).unwrap();
        assert_eq!(user.id, 1);
        assert_eq!(user.discharges, strings(&["aa", "mm", "zz"]));
        assert_eq!(user.store_macaroon, "m1");
        assert_eq!(user.store_discharges, user.discharges);

        let auth: AuthState = st.get(AUTH_KEY).unwrap();
        assert_eq!(auth.last_id, 1);
        assert_eq!(auth.users, vec![user]);
    }

    #[test]
    fn test_ids_increase_across_removals() {
        let state = State::in_memory();
        let mut st = state.lock();

        let first = new_user(&mut st, "a", "m1", Vec::new()).unwrap();
        let second = new_user(&mut st, "b", "m2", Vec::new()).unwrap();
        remove_user(&mut st, second.id).unwrap();
        remove_user(&mut st, first.id).unwrap();
        let third = new_user(&mut st, "c", "m3", Vec::new()).unwrap();

        assert_eq!((first.id, second.id, third.id), (1, 2, 3));
        let auth: AuthState = st.get(AUTH_KEY).unwrap();
        assert_eq!(auth.last_id, 3);
    }

    #[test]
    fn test_remove_unknown_user_leaves_state_unchanged() {
        let state = State::in_memory();
        let mut st = state.lock();
        new_user(&mut st, "a", "m1", Vec::new()).unwrap();
        let before: AuthState = st.get(AUTH_KEY).unwrap();

        let err = remove_user(&mut st, 42).unwrap_err();
        assert!(matches!(err, Error::InvalidUser { id: 42 }));
        assert_eq!(st.get::<AuthState>(AUTH_KEY).unwrap(), before);
    }

    #[test]
    fn test_remove_user_without_auth_state() {
        let state = State::in_memory();
        let mut st = state.lock();
        assert!(matches!(
            remove_user(&mut st, 1),
            Err(Error::InvalidUser { id: 1 })
        ));
        assert!(!st.contains(AUTH_KEY));
    }

    #[test]
    fn test_remove_user_keeps_others() {
        let state = State::in_memory();
        let mut st = state.lock();
        for name in ["a", "b", "c"] {
            new_user(&mut st, name, name, Vec::new()).unwrap();
        }

        remove_user(&mut st, 1).unwrap();

        let mut ids: Vec<u64> = st
            .get::<AuthState>(AUTH_KEY)
            .unwrap()
            .users
            .iter()
            .map(|u| u.id)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_user_lookup() {
        let state = State::in_memory();
        let mut st = state.lock();
        assert!(matches!(user(&st, 1), Err(Error::InvalidUser { id: 1 })));

        let created = new_user(&mut st, "alice", "m1", Vec::new()).unwrap();
        assert_eq!(user(&st, created.id).unwrap(), created);
        assert!(matches!(user(&st, 2), Err(Error::InvalidUser { id: 2 })));
    }

    #[test]
    fn test_check_macaroon_ignores_discharge_order() {
        let state = State::in_memory();
        let mut st = state.lock();
        let created = new_user(&mut st, "alice", "m1", strings(&["d2", "d1"])).unwrap();

        let supplied = strings(&["d1", "d2"]);
        assert_eq!(check_macaroon(&st, "m1", &supplied).unwrap(), created);

        let reversed = strings(&["d2", "d1"]);
        assert_eq!(check_macaroon(&st, "m1", &reversed).unwrap(), created);
        // The caller's slice keeps its order
        assert_eq!(reversed, strings(&["d2", "d1"]));
    }

    #[test]
    fn test_check_macaroon_rejects_mismatches() {
        let state = State::in_memory();
        let mut st = state.lock();
        new_user(&mut st, "alice", "m1", strings(&["d1", "d2"])).unwrap();

        for (macaroon, discharges) in [
            ("m2", strings(&["d1", "d2"])),
            ("m1", strings(&["d1"])),
            ("m1", strings(&["d1", "d2", "d3"])),
            ("m1", strings(&["d1", "dx"])),
        ] {
            assert!(matches!(
                check_macaroon(&st, macaroon, &discharges),
                Err(Error::InvalidAuth)
            ));
        }
    }

    #[test]
    fn test_check_macaroon_without_auth_state() {
        let state = State::in_memory();
        let st = state.lock();
        assert!(matches!(
            check_macaroon(&st, "m1", &[]),
            Err(Error::InvalidAuth)
        ));
    }

    #[test]
    fn test_check_macaroon_surfaces_corrupt_auth_state() {
        let state = State::in_memory();
        let mut st = state.lock();
        st.set(AUTH_KEY, &serde_json::json!({"users": "not a list"}))
            .unwrap();

        assert!(matches!(
            check_macaroon(&st, "m1", &[]),
            Err(Error::State(statestore::Error::Decode { .. }))
        ));
    }

    #[test]
    fn test_check_macaroon_picks_matching_user() {
        let state = State::in_memory();
        let mut st = state.lock();
        new_user(&mut st, "alice", "shared", strings(&["a"])).unwrap();
        let bob = new_user(&mut st, "bob", "shared", strings(&["b"])).unwrap();

        assert_eq!(check_macaroon(&st, "shared", &strings(&["b"])).unwrap(), bob);
    }

    #[test]
    fn test_authenticator_uses_store_credentials() {
        let state = State::in_memory();
        let mut st = state.lock();
        let created = new_user(&mut st, "alice", "m1", strings(&["d2", "d1"])).unwrap();

        assert_eq!(
            created.authenticator().authorization(),
            r#"Macaroon root="m1", discharge="d1", discharge="d2""#
        );
    }

    #[test]
    fn test_auth_state_json_field_names() {
        let auth = AuthState {
            last_id: 1,
            users: vec![UserState {
                id: 1,
                username: "alice".into(),
                macaroon: "m".into(),
                discharges: vec!["d".into()],
                store_macaroon: "m".into(),
                store_discharges: vec!["d".into()],
            }],
        };
        let json = serde_json::to_value(&auth).unwrap();
        assert_eq!(json["last-id"], 1);
        assert_eq!(json["users"][0]["store-macaroon"], "m");
        assert_eq!(json["users"][0]["store-discharges"][0], "d");
    }
}
