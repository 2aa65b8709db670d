//! Credential resolution: reuse a cached session while it is valid, otherwise
//! obtain a new one from STS and cache it.
//!
//! A profile with only `mfa_serial` gets a session token. A profile with
//! `role_arn` assumes the role, passing the MFA code along when `mfa_serial`
//! is also set. When the `source_profile` is itself managed by this tool, it
//! is resolved first and its session signs the request (role chaining).
//!
//! Sessions are cached under each profile's `target_profile`, which defaults
//! to the profile name.

use std::{collections::HashSet, time::SystemTime};

use aws_smithy_types::DateTime;
use log::{debug, info};

use crate::{
    credentials::CredentialRecord,
    error::Error,
    iam::{self, Iam},
    mfa::{self, ReadMfaToken},
    profile::{MfaDevice, Profile, ProfileSet},
    sdk::Caller,
    store::CredentialStore,
    sts::{AssumeRoleRequest, SessionTokenRequest, Sts},
};

/// Default lifetime of a `GetSessionToken` session, in seconds.
pub const SESSION_DURATION_SECONDS: i32 = 43_200;
/// Default lifetime of an `AssumeRole` session, in seconds.
pub const ROLE_DURATION_SECONDS: i32 = 3_600;

/// Resolves profiles to valid temporary credentials.
///
/// The resolver borrows everything it works with, so one invocation wires it
/// up once in `main` and tests can substitute fakes for the AWS seams.
pub struct Resolver<'a> {
    profiles: &'a ProfileSet,
    store: &'a CredentialStore,
    sts: &'a dyn Sts,
    iam: &'a dyn Iam,
    mfa: &'a dyn ReadMfaToken,
    /// Overrides every profile's `duration_seconds` when set.
    duration: Option<i32>,
    /// Overrides the requested profile's `target_profile` when set.
    target: Option<String>,
}

impl<'a> Resolver<'a> {
    /// Creates a resolver over loaded profiles and the credential cache.
    ///
    /// # Arguments
    /// * `profiles` - Profile definitions from the AWS config file
    /// * `store` - The credentials file sessions are cached in
    /// * `sts` - Issues `GetSessionToken` / `AssumeRole` requests
    /// * `iam` - Lists MFA devices for profiles with `mfa_serial = auto`
    /// * `mfa` - Supplies MFA codes; only consulted when STS is actually called
    pub fn new(
        profiles: &'a ProfileSet,
        store: &'a CredentialStore,
        sts: &'a dyn Sts,
        iam: &'a dyn Iam,
        mfa: &'a dyn ReadMfaToken,
    ) -> Self {
        Self {
            profiles,
            store,
            sts,
            iam,
            mfa,
            duration: None,
            target: None,
        }
    }

    /// Requests sessions of `duration` seconds instead of each profile's
    /// `duration_seconds` (or the built-in defaults).
    pub fn with_duration(mut self, duration: Option<i32>) -> Self {
        self.duration = duration;
        self
    }

    /// Caches the requested profile's session under `target` instead of its
    /// `target_profile`. Sources in a role chain keep their own targets.
    pub fn with_target(mut self, target: Option<String>) -> Self {
        self.target = target;
        self
    }

    /// Returns valid credentials for `name`, refreshing them when the cache is
    /// empty, expired, or `force` is set.
    ///
    /// Sources further down a role chain are always served from the cache
    /// when possible; `force` only applies to `name` itself.
    ///
    /// # Errors
    /// * [`Error::UnknownProfile`] - `name` is not configured (no SDK call is made)
    /// * [`Error::InvalidProfile`] - the profile or its chain cannot be resolved
    ///   as configured, or IAM reports no MFA device for `mfa_serial = auto`
    /// * [`Error::AuthenticationFailed`] - malformed MFA code or an SDK failure;
    ///   the cached record is left untouched
    /// * [`Error::Store`] - the credentials file cannot be read or written
    pub async fn resolve(&self, name: &str, force: bool) -> Result<CredentialRecord, Error> {
        let chain = self.chain(name)?;
        let now = DateTime::from(SystemTime::now());

        // The deepest profile is signed with long-term keys from its source.
        let Some(deepest) = chain.last() else {
            return Err(Error::UnknownProfile(name.to_string()));
        };
        let mut caller = Caller::Profile(deepest.source_profile.clone());

        let mut resolved = None;
        for profile in chain.iter().rev() {
            let requested = profile.name == name;
            let target = self.target_for(profile, requested);
            let record = self
                .resolve_one(profile, target, &caller, force && requested, now)
                .await?;
            caller = Caller::Session(record.clone());
            resolved = Some(record);
        }
        resolved.ok_or_else(|| Error::UnknownProfile(name.to_string()))
    }

    fn target_for<'p>(&'p self, profile: &'p Profile, requested: bool) -> &'p str {
        match &self.target {
            Some(target) if requested => target,
            _ => &profile.target_profile,
        }
    }

    /// Walks `source_profile` links from `name` while they point at managed
    /// profiles, validating each one. Nothing here touches the network.
    fn chain(&self, name: &str) -> Result<Vec<&'a Profile>, Error> {
        let Some(first) = self.profiles.get(name) else {
            debug!(
                "Known profiles: {}",
                self.profiles.names().collect::<Vec<_>>().join(", ")
            );
            return Err(Error::UnknownProfile(name.to_string()));
        };

        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = first;
        loop {
            if !current.is_managed() {
                return Err(Error::invalid(
                    &current.name,
                    "profile has neither mfa_serial nor role_arn",
                ));
            }
            if current.source_profile == current.name {
                return Err(Error::invalid(
                    &current.name,
                    "source_profile refers to the profile itself",
                ));
            }
            // Writing there would replace the long-term keys the session is minted from.
            if self.target_for(current, current.name == name) == current.source_profile {
                return Err(Error::invalid(
                    &current.name,
                    "target_profile must differ from source_profile",
                ));
            }
            if !seen.insert(current.name.as_str()) {
                return Err(Error::invalid(name, "source_profile chain contains a cycle"));
            }
            chain.push(current);

            match self.profiles.get(&current.source_profile) {
                Some(source) if source.is_managed() => {
                    if current.role_arn.is_none() {
                        return Err(Error::invalid(
                            &current.name,
                            "session tokens require long-term source credentials",
                        ));
                    }
                    current = source;
                }
                _ => return Ok(chain),
            }
        }
    }

    async fn resolve_one(
        &self,
        profile: &Profile,
        target: &str,
        caller: &Caller,
        force: bool,
        now: DateTime,
    ) -> Result<CredentialRecord, Error> {
        if !force {
            let cached = self.store.read(target).await.map_err(Error::Store)?;
            match cached {
                Some(record) if record.is_valid_at(now) => {
                    info!(
                        "Using cached credentials for '{}' from [{target}], valid until {}",
                        profile.name,
                        record.expiration_string()
                    );
                    return Ok(record);
                }
                Some(_) => debug!("Cached credentials in [{target}] have expired"),
                None => {}
            }
        }

        let record = self.acquire(profile, caller).await?;
        self.store
            .write(target, &record)
            .await
            .map_err(Error::Store)?;
        info!(
            "Updated {}, use profile '{target}' for your AWS requests. Credentials expire at: {}",
            self.store.path().display(),
            record.expiration_string()
        );
        Ok(record)
    }

    /// Performs exactly one STS call for `profile`.
    async fn acquire(&self, profile: &Profile, caller: &Caller) -> Result<CredentialRecord, Error> {
        let mfa = match &profile.mfa_serial {
            Some(device) => {
                let serial = self.serial_number(profile, device, caller).await?;
                let code = self.token_code(profile, &serial).await?;
                Some((serial, code))
            }
            None => None,
        };

        let result = match (&profile.role_arn, mfa) {
            (Some(role_arn), mfa) => {
                let (serial_number, token_code) = mfa.unzip();
                let request = AssumeRoleRequest {
                    role_arn: role_arn.clone(),
                    role_session_name: profile.role_session_name(),
                    duration_seconds: self.duration_for(profile, ROLE_DURATION_SECONDS),
                    external_id: profile.external_id.clone(),
                    serial_number,
                    token_code,
                    region: profile.region.clone(),
                };
                self.sts.assume_role(caller, request).await
            }
            (None, Some((serial_number, token_code))) => {
                let request = SessionTokenRequest {
                    serial_number,
                    token_code,
                    duration_seconds: self.duration_for(profile, SESSION_DURATION_SECONDS),
                    region: profile.region.clone(),
                };
                self.sts.get_session_token(caller, request).await
            }
            (None, None) => {
                return Err(Error::invalid(
                    &profile.name,
                    "profile has neither mfa_serial nor role_arn",
                ));
            }
        };

        result.map_err(|e| Error::auth(&profile.name, e))
    }

    /// The configured serial, or the caller's first IAM device for `auto`.
    async fn serial_number(
        &self,
        profile: &Profile,
        device: &MfaDevice,
        caller: &Caller,
    ) -> Result<String, Error> {
        let MfaDevice::AutoDetect = device else {
            return Ok(device.to_string());
        };
        let devices = self
            .iam
            .list_mfa_devices(caller, profile.region.as_deref())
            .await
            .map_err(|e| Error::auth(&profile.name, e))?;
        let serial = iam::pick_device(devices).ok_or_else(|| {
            Error::invalid(
                &profile.name,
                "No MFA device was specified and no MFA device was detected in IAM",
            )
        })?;
        debug!("Detected MFA device {serial} for profile '{}'", profile.name);
        Ok(serial)
    }

    async fn token_code(&self, profile: &Profile, serial: &str) -> Result<String, Error> {
        let code = self
            .mfa
            .read_mfa_token(serial)
            .await
            .map_err(|e| Error::auth(&profile.name, e.context("Failed to read MFA code")))?;
        if !mfa::is_well_formed(&code) {
            return Err(Error::auth(
                &profile.name,
                anyhow::anyhow!("MFA code must be exactly 6 digits"),
            ));
        }
        Ok(code)
    }

    fn duration_for(&self, profile: &Profile, default: i32) -> i32 {
        self.duration
            .or(profile.duration_seconds)
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::{Result, bail};
    use async_trait::async_trait;

    use super::*;
    use crate::{
        mfa::StaticMfaTokenReader,
        store::tests::{record, scratch_path},
    };

    const CONFIG: &str = "\
[profile mfa]
source_profile = keys
mfa_serial = arn:aws:iam::111111111111:mfa/me

[profile role]
source_profile = keys
role_arn = arn:aws:iam::222222222222:role/Reader

[profile admin]
source_profile = mfa
role_arn = arn:aws:iam::222222222222:role/Admin
duration_seconds = 1800

[profile plain]
region = us-west-2

[profile self]
source_profile = self
mfa_serial = arn:aws:iam::111111111111:mfa/me

[profile loop-a]
source_profile = loop-b
role_arn = arn:aws:iam::222222222222:role/A

[profile loop-b]
source_profile = loop-a
role_arn = arn:aws:iam::222222222222:role/B

[profile mfa-on-mfa]
source_profile = mfa
mfa_serial = arn:aws:iam::111111111111:mfa/me

[profile ops]
source_profile = keys
role_arn = arn:aws:iam::222222222222:role/Ops
target_profile = ops-session

[profile clobber]
source_profile = keys
mfa_serial = arn:aws:iam::111111111111:mfa/me
target_profile = keys

[profile dev]
source_profile = keys
mfa_serial = auto
";

    /// Records every call and answers with a fixed record, or fails on demand.
    #[derive(Default)]
    struct FakeSts {
        calls: Mutex<Vec<String>>,
        fail: bool,
        devices: Vec<String>,
    }

    impl FakeSts {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn with_devices(devices: &[&str]) -> Self {
            Self {
                devices: devices.iter().map(ToString::to_string).collect(),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn answer(&self, call: String) -> Result<CredentialRecord> {
            self.calls.lock().unwrap().push(call);
            if self.fail {
                bail!("An error occurred (AccessDenied): MultiFactorAuthentication failed");
            }
            Ok(record("ASIAFRESH", future()))
        }
    }

    fn caller_name(caller: &Caller) -> String {
        match caller {
            Caller::Profile(name) => format!("profile:{name}"),
            Caller::Session(record) => format!("session:{}", record.access_key_id),
        }
    }

    #[async_trait]
    impl Sts for FakeSts {
        async fn get_session_token(
            &self,
            caller: &Caller,
            request: SessionTokenRequest,
        ) -> Result<CredentialRecord> {
            self.answer(format!(
                "get_session_token {} {} {} {}",
                caller_name(caller),
                request.serial_number,
                request.token_code,
                request.duration_seconds
            ))
        }

        async fn assume_role(
            &self,
            caller: &Caller,
            request: AssumeRoleRequest,
        ) -> Result<CredentialRecord> {
            self.answer(format!(
                "assume_role {} {} {} {} {:?}",
                caller_name(caller),
                request.role_arn,
                request.role_session_name,
                request.duration_seconds,
                request.token_code
            ))
        }
    }

    #[async_trait]
    impl Iam for FakeSts {
        async fn list_mfa_devices(
            &self,
            caller: &Caller,
            _region: Option<&str>,
        ) -> Result<Vec<String>> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("list_mfa_devices {}", caller_name(caller)));
            Ok(self.devices.clone())
        }
    }

    fn now_secs() -> i64 {
        DateTime::from(SystemTime::now()).secs()
    }

    fn future() -> i64 {
        now_secs() + 3_600
    }

    fn past() -> i64 {
        now_secs() - 60
    }

    struct Fixture {
        profiles: ProfileSet,
        store: CredentialStore,
        sts: FakeSts,
        mfa: StaticMfaTokenReader,
    }

    impl Fixture {
        fn new(test: &str) -> Self {
            Self::with(test, FakeSts::default(), "123456")
        }

        fn with(test: &str, sts: FakeSts, code: &str) -> Self {
            Self {
                profiles: ProfileSet::parse(CONFIG).unwrap(),
                store: CredentialStore::new(Some(scratch_path(test))).unwrap(),
                sts,
                mfa: StaticMfaTokenReader::from(code),
            }
        }

        fn resolver(&self) -> Resolver<'_> {
            Resolver::new(&self.profiles, &self.store, &self.sts, &self.sts, &self.mfa)
        }
    }

    #[tokio::test]
    async fn valid_cached_record_is_returned_without_calling_sts() {
        let fx = Fixture::new("cache_hit");
        let cached = record("ASIACACHED", future());
        fx.store.write("mfa", &cached).await.unwrap();

        let resolved = fx.resolver().resolve("mfa", false).await.unwrap();

        assert_eq!(resolved, cached);
        assert!(fx.sts.calls().is_empty());
    }

    #[tokio::test]
    async fn expired_record_is_refreshed_with_one_session_token_call() {
        let fx = Fixture::new("expired");
        fx.store.write("mfa", &record("ASIAOLD", past())).await.unwrap();

        let resolved = fx.resolver().resolve("mfa", false).await.unwrap();

        assert_eq!(resolved.access_key_id, "ASIAFRESH");
        assert_eq!(
            fx.sts.calls(),
            ["get_session_token profile:keys arn:aws:iam::111111111111:mfa/me 123456 43200"]
        );
        assert_eq!(fx.store.read("mfa").await.unwrap(), Some(resolved));
    }

    #[tokio::test]
    async fn missing_record_for_role_profile_assumes_role_once() {
        let fx = Fixture::new("role_missing");

        fx.resolver().resolve("role", false).await.unwrap();

        assert_eq!(
            fx.sts.calls(),
            ["assume_role profile:keys arn:aws:iam::222222222222:role/Reader aws-auth-role 3600 None"]
        );
        assert!(fx.store.read("role").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn force_bypasses_a_valid_cache() {
        let fx = Fixture::new("force");
        fx.store.write("mfa", &record("ASIACACHED", future())).await.unwrap();

        let resolved = fx.resolver().resolve("mfa", true).await.unwrap();

        assert_eq!(resolved.access_key_id, "ASIAFRESH");
        assert_eq!(fx.sts.calls().len(), 1);
    }

    #[tokio::test]
    async fn duration_override_wins_over_profile_and_defaults() {
        let fx = Fixture::new("duration");

        fx.resolver()
            .with_duration(Some(900))
            .resolve("mfa", false)
            .await
            .unwrap();

        assert!(fx.sts.calls()[0].ends_with(" 900"));
    }

    #[tokio::test]
    async fn role_chain_uses_the_cached_source_session() {
        let fx = Fixture::new("chain_cached");
        fx.store.write("mfa", &record("ASIAMFA", future())).await.unwrap();

        fx.resolver().resolve("admin", true).await.unwrap();

        assert_eq!(
            fx.sts.calls(),
            ["assume_role session:ASIAMFA arn:aws:iam::222222222222:role/Admin aws-auth-admin 1800 None"]
        );
    }

    #[tokio::test]
    async fn role_chain_refreshes_an_expired_source_first() {
        let fx = Fixture::new("chain_refresh");

        fx.resolver().resolve("admin", false).await.unwrap();

        let calls = fx.sts.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("get_session_token profile:keys"));
        assert!(calls[1].starts_with("assume_role session:ASIAFRESH"));
        assert!(fx.store.read("mfa").await.unwrap().is_some());
        assert!(fx.store.read("admin").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_profile_fails_before_any_sts_call() {
        let fx = Fixture::new("unknown");

        let err = fx.resolver().resolve("nope", false).await.unwrap_err();

        assert!(matches!(err, Error::UnknownProfile(ref p) if p == "nope"));
        assert!(fx.sts.calls().is_empty());
    }

    #[tokio::test]
    async fn misconfigured_profiles_are_rejected_before_any_sts_call() {
        let fx = Fixture::new("invalid");
        let resolver = fx.resolver();

        for name in ["plain", "self", "loop-a", "mfa-on-mfa", "clobber"] {
            let err = resolver.resolve(name, false).await.unwrap_err();
            assert!(matches!(err, Error::InvalidProfile { .. }), "{name}: {err}");
        }
        assert!(fx.sts.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_mfa_code_fails_and_keeps_the_cache() {
        let fx = Fixture::with("bad_code", FakeSts::default(), "12ab56");
        let stale = record("ASIAOLD", past());
        fx.store.write("mfa", &stale).await.unwrap();

        let err = fx.resolver().resolve("mfa", false).await.unwrap_err();

        assert!(matches!(err, Error::AuthenticationFailed { .. }));
        assert!(fx.sts.calls().is_empty());
        assert_eq!(fx.store.read("mfa").await.unwrap(), Some(stale));
    }

    #[tokio::test]
    async fn sts_failure_is_an_authentication_failure_with_the_sdk_message() {
        let fx = Fixture::with("sts_failure", FakeSts::failing(), "123456");
        let stale = record("ASIAOLD", past());
        fx.store.write("mfa", &stale).await.unwrap();

        let err = fx.resolver().resolve("mfa", false).await.unwrap_err();

        match err {
            Error::AuthenticationFailed { source, .. } => {
                assert!(source.to_string().contains("MultiFactorAuthentication failed"));
            }
            other => panic!("expected an authentication failure, got {other}"),
        }
        assert_eq!(fx.sts.calls().len(), 1);
        assert_eq!(fx.store.read("mfa").await.unwrap(), Some(stale));
    }

    #[tokio::test]
    async fn role_with_mfa_passes_the_code_to_assume_role() {
        let fx = Fixture::new("role_mfa");
        let profiles = ProfileSet::parse(
            "[profile ops]\nsource_profile = keys\nmfa_serial = arn:aws:iam::1:mfa/me\n\
             role_arn = arn:aws:iam::2:role/Ops\n",
        )
        .unwrap();

        Resolver::new(&profiles, &fx.store, &fx.sts, &fx.sts, &fx.mfa)
            .resolve("ops", false)
            .await
            .unwrap();

        assert_eq!(
            fx.sts.calls(),
            ["assume_role profile:keys arn:aws:iam::2:role/Ops aws-auth-ops 3600 Some(\"123456\")"]
        );
    }

    #[tokio::test]
    async fn session_is_cached_under_the_target_profile() {
        let fx = Fixture::new("target_key");

        fx.resolver().resolve("ops", false).await.unwrap();

        assert!(fx.store.read("ops-session").await.unwrap().is_some());
        assert_eq!(fx.store.read("ops").await.unwrap(), None);

        // The cache is looked up under the same section.
        fx.resolver().resolve("ops", false).await.unwrap();
        assert_eq!(fx.sts.calls().len(), 1);
    }

    #[tokio::test]
    async fn target_override_applies_to_the_requested_profile_only() {
        let fx = Fixture::new("target_override");

        fx.resolver()
            .with_target(Some("admin-session".to_string()))
            .resolve("admin", false)
            .await
            .unwrap();

        assert!(fx.store.read("admin-session").await.unwrap().is_some());
        assert!(fx.store.read("mfa").await.unwrap().is_some());
        assert_eq!(fx.store.read("admin").await.unwrap(), None);
    }

    #[tokio::test]
    async fn target_override_onto_the_source_is_rejected() {
        let fx = Fixture::new("target_source");

        let err = fx
            .resolver()
            .with_target(Some("keys".to_string()))
            .resolve("mfa", false)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidProfile { .. }));
        assert!(fx.sts.calls().is_empty());
    }

    #[tokio::test]
    async fn auto_mfa_serial_uses_the_first_iam_device() {
        let fx = Fixture::with(
            "auto_device",
            FakeSts::with_devices(&["arn:aws:iam::1:mfa/phone", "arn:aws:iam::1:mfa/key"]),
            "123456",
        );

        fx.resolver().resolve("dev", false).await.unwrap();

        assert_eq!(
            fx.sts.calls(),
            [
                "list_mfa_devices profile:keys",
                "get_session_token profile:keys arn:aws:iam::1:mfa/phone 123456 43200",
            ]
        );
    }

    #[tokio::test]
    async fn auto_mfa_serial_without_devices_fails_before_sts() {
        let fx = Fixture::new("auto_no_device");

        let err = fx.resolver().resolve("dev", false).await.unwrap_err();

        assert!(matches!(err, Error::InvalidProfile { .. }), "{err}");
        assert_eq!(fx.sts.calls(), ["list_mfa_devices profile:keys"]);
        assert_eq!(fx.store.read("dev").await.unwrap(), None);
    }
}
