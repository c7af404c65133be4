mod support;

// std
use std::{path::PathBuf, sync::atomic::Ordering};
// crates.io
use color_eyre::Result;
// self
use kerberos_broker::{
	auth::{AuthState, Principal},
	config::{EnvKey, MemoryEnvironment},
	error::{ConfigError, DeepConfigError, Error, LoginError},
	manager::Phase,
	time::OffsetDateTime,
};
use support::*;

fn seeded_env() -> std::sync::Arc<MemoryEnvironment> {
	std::sync::Arc::new(
		MemoryEnvironment::new()
			.with(EnvKey::Krb5Config, "/etc/krb5.conf")
			.with(EnvKey::Realm, "SYSTEM.COM"),
	)
}

#[tokio::test]
async fn keytab_login_then_logout_restores_everything() -> Result<()> {
	let acquirer = MockAcquirer::new();
	let env = seeded_env();
	let before = env.snapshot();
	let keytab = keytab_fixture();
	let manager = manager(&acquirer, &env);
	let state = manager.login(keytab_config(&keytab, "svc@EXAMPLE.COM"), None).await?;

	assert!(state.is_authenticated());
	assert_eq!(state.principal(), Some(&Principal::parse("svc@EXAMPLE.COM")?));
	assert!(state.valid_until().is_some_and(|until| until > OffsetDateTime::now_utc()));
	assert_eq!(*manager.state(), *state);

	let conf: Option<PathBuf> =
		manager.submit(|session| session.krb5_conf_path().map(|p| p.to_path_buf())).await?;
	let conf = conf.expect("REALM_KDC login should synthesize a krb5.conf.");
	let staged = env.snapshot();

	assert!(conf.is_file());
	assert_eq!(staged.get(&EnvKey::Krb5Config), Some(&conf.display().to_string()));
	assert_eq!(staged.get(&EnvKey::Principal).map(String::as_str), Some("svc@EXAMPLE.COM"));
	assert!(!staged.contains_key(&EnvKey::Realm));

	let state = manager.logout().await?;

	assert_eq!(*state, AuthState::Unauthenticated);
	assert_eq!(env.snapshot(), before);
	assert!(!conf.exists());
	assert_eq!(acquirer.acquires(), 1);
	assert_eq!(acquirer.releases(), 1);
	assert_eq!(manager.submit(|session| session.phase()).await?, Phase::LoggedOut);

	Ok(())
}

#[tokio::test]
async fn failed_login_rolls_back_environment_and_temp_file() -> Result<()> {
	let acquirer = MockAcquirer::new();
	let env = seeded_env();
	let before = env.snapshot();
	let keytab = keytab_fixture();
	let manager = manager(&acquirer, &env);

	acquirer.fail_acquire(Some("Client not found in Kerberos database"));

	let err = manager
		.login(keytab_config(&keytab, "svc@EXAMPLE.COM"), None)
		.await
		.expect_err("Login should fail.");

	assert!(matches!(err, Error::Login(LoginError::Rejected { .. })));
	assert_eq!(env.snapshot(), before);
	assert!(manager.submit(|session| session.krb5_conf_path().is_none()).await?);
	assert!(!manager.state().is_authenticated());
	assert_eq!(manager.metrics().login_failures(), 1);

	// Retrying after the failure repeats the full login sequence.
	acquirer.fail_acquire(None);

	assert!(manager.login(keytab_config(&keytab, "svc@EXAMPLE.COM"), None).await?.is_authenticated());
	assert_eq!(acquirer.acquires(), 2);

	Ok(())
}

#[tokio::test]
async fn deep_validation_checks_keytab_contents_and_realm() -> Result<()> {
	let acquirer = MockAcquirer::new();
	let env = seeded_env();
	let before = env.snapshot();
	let keytab = keytab_fixture();
	let manager = manager(&acquirer, &env);

	acquirer.restrict_keytab(&["svc@EXAMPLE.COM", "svc@OTHER.COM"]);

	let err = manager
		.login(keytab_config(&keytab, "nobody@EXAMPLE.COM"), None)
		.await
		.expect_err("Unknown keytab principal should be rejected.");

	assert!(matches!(err, Error::DeepConfig(DeepConfigError::PrincipalNotInKeytab { .. })));

	let err = manager
		.login(keytab_config(&keytab, "svc@OTHER.COM"), None)
		.await
		.expect_err("Realm mismatch should be rejected.");

	assert!(matches!(err, Error::DeepConfig(DeepConfigError::RealmMismatch { .. })));

	let missing = keytab.path().with_extension("missing");
	let cfg = kerberos_broker::config::Configuration::builder()
		.auth_method(kerberos_broker::config::AuthMethod::Keytab)
		.keytab("svc@EXAMPLE.COM", missing.display().to_string())
		.build();
	let err = manager.login(cfg, None).await.expect_err("Missing keytab should be rejected.");

	assert!(matches!(err, Error::DeepConfig(DeepConfigError::KeytabUnreadable { .. })));
	assert_eq!(acquirer.acquires(), 0);
	assert_eq!(env.snapshot(), before);

	Ok(())
}

#[tokio::test]
async fn shallow_validation_fails_before_staging() -> Result<()> {
	let acquirer = MockAcquirer::new();
	let env = seeded_env();
	let before = env.snapshot();
	let manager = manager(&acquirer, &env);
	let cfg = kerberos_broker::config::Configuration::builder()
		.conf_source(kerberos_broker::config::ConfSource::RealmKdc)
		.kdc("kdc.example.com")
		.build();
	let err = manager.configure(cfg).await.expect_err("Missing realm should be rejected.");

	assert!(matches!(err, Error::Config(ConfigError::MissingRealm)));
	assert_eq!(env.snapshot(), before);
	assert_eq!(acquirer.config_refreshes(), 0);

	Ok(())
}

#[tokio::test]
async fn logout_while_logged_out_releases_nothing() -> Result<()> {
	let acquirer = MockAcquirer::new();
	let env = seeded_env();
	let manager = manager(&acquirer, &env);

	for _ in 0..2 {
		assert_eq!(*manager.logout().await?, AuthState::Unauthenticated);
	}

	assert_eq!(acquirer.releases(), 0);
	assert_eq!(manager.metrics().rollbacks(), 2);

	Ok(())
}

#[tokio::test]
async fn password_login_prompts_and_honors_cancellation() -> Result<()> {
	let acquirer = MockAcquirer::new();
	let env = seeded_env();
	let manager = manager(&acquirer, &env);
	let declining = ScriptedHandler::declining();
	let prompts = declining.prompts();
	let err = manager
		.login(password_config(), prompt(declining))
		.await
		.expect_err("Declined prompt should cancel the login.");

	assert!(matches!(err, Error::UserCancelled));
	assert_eq!(prompts.load(Ordering::SeqCst), 1);
	assert_eq!(acquirer.acquires(), 0);

	let err = manager
		.login(password_config(), prompt(ScriptedHandler::accepting("alice@EXAMPLE.COM", "wrong")))
		.await
		.expect_err("Wrong password should be rejected.");

	assert!(matches!(err, Error::Login(LoginError::Rejected { .. })));
	assert!(!manager.state().is_authenticated());

	let err = manager
		.login(password_config(), None)
		.await
		.expect_err("Password login without a prompt should be rejected.");

	assert!(matches!(err, Error::Login(LoginError::Rejected { .. })));

	let state = manager
		.login(password_config(), prompt(ScriptedHandler::accepting("alice@EXAMPLE.COM", "secret")))
		.await?;

	assert_eq!(state.principal().map(ToString::to_string).as_deref(), Some("alice@EXAMPLE.COM"));

	Ok(())
}

#[tokio::test]
async fn configure_twice_is_an_illegal_state() -> Result<()> {
	let acquirer = MockAcquirer::new();
	let env = seeded_env();
	let manager = manager(&acquirer, &env);

	manager.configure(ticket_cache_config()).await?;

	let err = manager
		.configure(ticket_cache_config())
		.await
		.expect_err("Second configure should be rejected.");

	assert!(matches!(err, Error::IllegalState { .. }));
	assert_eq!(manager.submit(|session| session.phase()).await?, Phase::Configured);

	manager.logout().await?;

	assert_eq!(manager.submit(|session| session.phase()).await?, Phase::LoggedOut);

	Ok(())
}

#[tokio::test]
async fn ticket_cache_check_detects_external_renewal() -> Result<()> {
	let acquirer = MockAcquirer::new();
	let env = seeded_env();
	let manager = manager(&acquirer, &env);
	let err = manager
		.ticket_cache_has_changed()
		.await
		.expect_err("The cache check requires a ticket-cache session.");

	assert!(matches!(err, Error::IllegalState { .. }));

	manager.login(ticket_cache_config(), None).await?;

	assert!(!manager.ticket_cache_has_changed().await?);

	acquirer.rotate_ticket_cache();

	assert!(manager.ticket_cache_has_changed().await?);

	Ok(())
}

#[tokio::test]
async fn subscribers_and_indicator_follow_the_session() -> Result<()> {
	let acquirer = MockAcquirer::new();
	let env = seeded_env();
	let manager = manager(&acquirer, &env);
	let mut states = manager.subscribe();
	let indicator = manager.status_indicator();

	assert!(!*indicator.borrow());

	manager.login(ticket_cache_config(), None).await?;

	assert!(states.has_changed()?);
	assert!(states.borrow_and_update().is_authenticated());
	assert!(*indicator.borrow());

	manager.logout().await?;

	assert!(!states.borrow_and_update().is_authenticated());
	assert!(!*indicator.borrow());

	manager.set_status_indicator(true);

	assert!(*indicator.borrow());

	Ok(())
}

#[tokio::test]
async fn second_login_is_refused_without_touching_the_live_session() -> Result<()> {
	let acquirer = MockAcquirer::new();
	let env = seeded_env();
	let keytab = keytab_fixture();
	let manager = manager(&acquirer, &env);
	let state = manager.login(keytab_config(&keytab, "svc@EXAMPLE.COM"), None).await?;
	let staged = env.snapshot();
	let err = manager
		.login(keytab_config(&keytab, "other@EXAMPLE.COM"), None)
		.await
		.expect_err("Login over a live session should be refused.");

	assert!(matches!(err, Error::IllegalState { .. }));
	assert_eq!(manager.state(), state);
	assert!(manager.state().is_authenticated());
	assert_eq!(manager.submit(|session| session.phase()).await?, Phase::LoggedIn);
	assert_eq!(env.snapshot(), staged);
	assert_eq!(acquirer.acquires(), 1);
	assert_eq!(acquirer.releases(), 0);

	Ok(())
}
