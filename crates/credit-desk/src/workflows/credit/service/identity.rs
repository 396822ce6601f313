use chrono::Utc;
use serde_json::json;

use super::{AuditEvent, CreditDeskService};
use crate::workflows::credit::audit::actions;
use crate::workflows::credit::bureau::CreditBureau;
use crate::workflows::credit::domain::{AccountDraft, AffectedTable, Caller, Role, User, UserId};
use crate::workflows::credit::error::CreditDeskError;
use crate::workflows::credit::intake::{validate_account, validate_secret};
use crate::workflows::credit::policy::{Capability, Resource};
use crate::workflows::credit::repository::{
    AuditDraft, CreditStore, LedgerRead, NewUser, Page, PageRequest, RepositoryError, UserFilter,
};
use crate::workflows::credit::tokens::{Session, BEARER};

fn require_user<L>(ledger: &L, id: UserId) -> Result<User, CreditDeskError>
where
    L: LedgerRead + ?Sized,
{
    ledger
        .user(id)?
        .ok_or_else(|| CreditDeskError::not_found("user", id.0))
}

fn username_conflict(err: RepositoryError) -> CreditDeskError {
    match err {
        RepositoryError::Conflict(reason) => CreditDeskError::Conflict(reason),
        other => CreditDeskError::Storage(other),
    }
}

impl<S, B> CreditDeskService<S, B>
where
    S: CreditStore + 'static,
    B: CreditBureau + 'static,
{
    /// Resolve a user id into an active caller.
    pub fn resolve_caller(
        &self,
        user_id: UserId,
        source_address: Option<String>,
    ) -> Result<Caller, CreditDeskError> {
        let user = self
            .store
            .read(|ledger| Ok::<_, CreditDeskError>(ledger.user(user_id)?))?
            .ok_or(CreditDeskError::Unauthenticated)?;
        if !user.active {
            return Err(CreditDeskError::Deactivated);
        }
        Ok(Caller::new(user, source_address))
    }

    /// Resolve a bearer token issued by [`Self::login`] into an active caller.
    pub fn resolve_token(
        &self,
        token: &str,
        source_address: Option<String>,
    ) -> Result<Caller, CreditDeskError> {
        let user_id = self.tokens.verify(token).map_err(|err| {
            tracing::warn!(reason = %err, "bearer token rejected");
            CreditDeskError::Unauthenticated
        })?;
        self.resolve_caller(user_id, source_address)
    }

    /// Authenticate and issue a bearer token for the account.
    pub fn login(
        &self,
        username: &str,
        secret: &str,
        source_address: Option<String>,
    ) -> Result<Session, CreditDeskError> {
        let user = self.authenticate(username, secret, source_address)?;
        let (token, expires_at) = self.tokens.issue(&user)?;
        Ok(Session {
            token,
            token_type: BEARER,
            expires_at,
            user,
        })
    }

    /// Check credentials. The secret is verified before the active flag, so a wrong
    /// secret never reveals whether an account is deactivated.
    pub fn authenticate(
        &self,
        username: &str,
        secret: &str,
        source_address: Option<String>,
    ) -> Result<User, CreditDeskError> {
        let username = username.trim();
        let found = self.store.read(|ledger| {
            let Some(user) = ledger.user_by_username(username)? else {
                return Ok::<_, CreditDeskError>(None);
            };
            let digest = ledger.secret_digest(user.id)?;
            Ok(digest.map(|digest| (user, digest)))
        })?;

        let Some((user, digest)) = found else {
            tracing::warn!(username, "login attempt for unknown username");
            return Err(CreditDeskError::InvalidCredentials);
        };
        if !self.hasher.verify(secret, &digest)? {
            tracing::warn!(user_id = %user.id, "login attempt with wrong secret");
            return Err(CreditDeskError::InvalidCredentials);
        }
        if !user.active {
            tracing::warn!(user_id = %user.id, "login attempt on deactivated account");
            return Err(CreditDeskError::Deactivated);
        }

        let caller = Caller::new(user.clone(), source_address);
        self.commit(&caller, |_ledger| {
            Ok(((), AuditEvent::new(actions::LOGIN, AffectedTable::Users, user.id.0)))
        })?;
        tracing::info!(user_id = %user.id, role = user.role.label(), "user authenticated");
        Ok(user)
    }

    pub fn change_secret(
        &self,
        caller: &Caller,
        current: &str,
        replacement: &str,
    ) -> Result<(), CreditDeskError> {
        validate_secret("new_secret", replacement)?;
        let user_id = caller.id();

        let stored = self
            .store
            .read(|ledger| Ok::<_, CreditDeskError>(ledger.secret_digest(user_id)?))?
            .ok_or_else(|| CreditDeskError::not_found("user", user_id.0))?;
        if !self.hasher.verify(current, &stored)? {
            return Err(CreditDeskError::InvalidCredentials);
        }
        let digest = self.hasher.digest(replacement)?;

        self.commit(caller, |ledger| {
            ledger.set_secret_digest(user_id, &digest)?;
            Ok((
                (),
                AuditEvent::new(actions::CHANGE_SECRET, AffectedTable::Users, user_id.0),
            ))
        })?;
        tracing::info!(user_id = %user_id, "secret changed");
        Ok(())
    }

    pub fn create_user(
        &self,
        caller: &Caller,
        draft: AccountDraft,
    ) -> Result<User, CreditDeskError> {
        self.authorize(caller, Capability::ManageUsers, Resource::None)?;
        let account = validate_account(draft)?;
        let digest = self.hasher.digest(&account.secret)?;

        let user = self.commit(caller, |ledger| {
            let user = ledger
                .insert_user(NewUser {
                    username: account.username.clone(),
                    display_name: account.display_name.clone(),
                    role: account.role,
                    secret_digest: digest,
                    created_at: Utc::now(),
                })
                .map_err(username_conflict)?;
            let event = AuditEvent::new(actions::CREATE_USER, AffectedTable::Users, user.id.0)
                .details(json!({ "username": user.username, "role": user.role.label() }));
            Ok((user, event))
        })?;
        tracing::info!(user_id = %user.id, role = user.role.label(), "user created");
        Ok(user)
    }

    pub fn set_role(
        &self,
        caller: &Caller,
        target: UserId,
        role: Role,
    ) -> Result<User, CreditDeskError> {
        self.authorize(caller, Capability::ManageUsers, Resource::None)?;
        self.commit(caller, |ledger| {
            let mut user = require_user(&*ledger, target)?;
            let previous = user.role;
            user.role = role;
            ledger.save_user(&user)?;
            let event = AuditEvent::new(actions::SET_ROLE, AffectedTable::Users, target.0)
                .details(json!({ "from": previous.label(), "to": role.label() }));
            Ok((user, event))
        })
    }

    pub fn deactivate_user(&self, caller: &Caller, target: UserId) -> Result<User, CreditDeskError> {
        self.authorize(caller, Capability::ManageUsers, Resource::None)?;
        let user = self
            .store
            .read(|ledger| require_user(ledger, target))?;
        self.authorize(caller, Capability::ManageUsers, Resource::DeactivationTarget(&user))?;
        self.set_active(caller, target, false)
    }

    pub fn activate_user(&self, caller: &Caller, target: UserId) -> Result<User, CreditDeskError> {
        self.authorize(caller, Capability::ManageUsers, Resource::None)?;
        self.set_active(caller, target, true)
    }

    fn set_active(
        &self,
        caller: &Caller,
        target: UserId,
        active: bool,
    ) -> Result<User, CreditDeskError> {
        let action = if active {
            actions::ACTIVATE_USER
        } else {
            actions::DEACTIVATE_USER
        };
        let user = self.commit(caller, |ledger| {
            let mut user = require_user(&*ledger, target)?;
            user.active = active;
            ledger.save_user(&user)?;
            Ok((user, AuditEvent::new(action, AffectedTable::Users, target.0)))
        })?;
        tracing::info!(user_id = %target, active, "user activation changed");
        Ok(user)
    }

    /// Users may always read their own account; anything else needs user management.
    pub fn get_user(&self, caller: &Caller, id: UserId) -> Result<User, CreditDeskError> {
        if caller.id() != id {
            self.authorize(caller, Capability::ManageUsers, Resource::None)?;
        }
        self.store.read(|ledger| require_user(ledger, id))
    }

    pub fn list_users(
        &self,
        caller: &Caller,
        filter: &UserFilter,
        page: PageRequest,
    ) -> Result<Page<User>, CreditDeskError> {
        self.authorize(caller, Capability::ManageUsers, Resource::None)?;
        self.store
            .read(|ledger| Ok::<_, CreditDeskError>(ledger.users(filter, page)?))
    }

    /// Seed accounts into an empty store. Returns nothing when users already exist.
    ///
    /// Runs as one transaction with each account as the actor of its own audit entry,
    /// whatever the audit policy.
    pub fn bootstrap(&self, accounts: Vec<AccountDraft>) -> Result<Vec<User>, CreditDeskError> {
        let accounts = accounts
            .into_iter()
            .map(validate_account)
            .collect::<Result<Vec<_>, _>>()?;
        let seeded = self
            .store
            .read(|ledger| Ok::<_, CreditDeskError>(ledger.user_count()?))?;
        if seeded > 0 {
            tracing::debug!("bootstrap skipped, users already present");
            return Ok(Vec::new());
        }
        let digests = accounts
            .iter()
            .map(|account| self.hasher.digest(&account.secret))
            .collect::<Result<Vec<_>, _>>()?;

        let created = self.store.write(|ledger| {
            if ledger.user_count()? > 0 {
                return Ok::<_, CreditDeskError>(Vec::new());
            }
            let mut created = Vec::with_capacity(accounts.len());
            for (account, digest) in accounts.iter().zip(digests) {
                let now = Utc::now();
                let user = ledger
                    .insert_user(NewUser {
                        username: account.username.clone(),
                        display_name: account.display_name.clone(),
                        role: account.role,
                        secret_digest: digest,
                        created_at: now,
                    })
                    .map_err(username_conflict)?;
                ledger
                    .append_audit(AuditDraft {
                        actor_id: user.id,
                        actor_role: user.role,
                        action: actions::BOOTSTRAP_USER.to_string(),
                        affected_table: Some(AffectedTable::Users),
                        affected_id: Some(user.id.0),
                        comment: None,
                        details: Some(json!({ "username": user.username })),
                        source_address: None,
                        recorded_at: now,
                    })
                    .map_err(CreditDeskError::AuditWrite)?;
                created.push(user);
            }
            Ok(created)
        })?;

        if created.is_empty() {
            tracing::debug!("bootstrap skipped, users already present");
        } else {
            tracing::info!(count = created.len(), "bootstrapped user accounts");
        }
        Ok(created)
    }
}
