//! End-to-end wiring: by-name, by-type, collection and value injection,
//! lifecycle hooks, config-backed components and cycle detection.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use kestrel_app::{AppError, AppResult, Application, Component, Injected, Registration};
use kestrel_env::{BindField, BindKind, BindValue, Bindable, EnvResult, Environment};

type EventLog = Arc<Mutex<Vec<String>>>;

fn test_env(args: &[&str]) -> Arc<Environment> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut argv = vec!["prog".to_string()];
    argv.extend(args.iter().map(|s| s.to_string()));
    Arc::new(
        Environment::builder()
            .args(argv)
            .profile_dir("/nonexistent-kestrel-profiles")
            .build()
            .unwrap(),
    )
}

trait Dao: Component {
    fn table(&self) -> &'static str;
}

struct UserDao;
impl Component for UserDao {
    fn order(&self) -> i64 {
        2
    }
}
impl Dao for UserDao {
    fn table(&self) -> &'static str {
        "user"
    }
}

struct MomentDao;
impl Component for MomentDao {
    fn order(&self) -> i64 {
        1
    }
}
impl Dao for MomentDao {
    fn table(&self) -> &'static str {
        "moment"
    }
}

fn dao_registration<T: Component + Dao>(dao: T) -> Registration {
    let handle = Arc::new(RwLock::new(dao));
    let view: Arc<RwLock<dyn Dao>> = handle.clone();
    Registration::new(handle).provides::<dyn Dao>(view)
}

#[derive(Default)]
struct UserService {
    dao: Option<Arc<RwLock<UserDao>>>,
    moment_dao: Option<Arc<RwLock<MomentDao>>>,
    all_daos: Vec<Arc<RwLock<dyn Dao>>>,
    motd: String,
}

impl Component for UserService {
    fn assign(&mut self, field: &str, value: Injected) -> AppResult<()> {
        match field {
            "dao" => self.dao = value.one::<UserDao>(),
            "momentDao" => self.moment_dao = value.one::<MomentDao>(),
            "allDaos" => self.all_daos = value.many::<dyn Dao>(),
            "motd" => self.motd = value.text().unwrap_or_default().to_string(),
            other => return Err(AppError::unknown_field(other)),
        }
        Ok(())
    }
}

#[test]
fn wires_by_type_by_name_collection_and_value() {
    let env = test_env(&["--user.name=Arvin"]);
    let app = Application::new(env).named("wiring-test");
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));

    app.register(dao_registration(UserDao)).unwrap();
    app.register(dao_registration(MomentDao)).unwrap();

    let init_events = Arc::clone(&events);
    let destroy_events = Arc::clone(&events);
    app.register(
        Registration::new(Arc::new(RwLock::new(UserService::default())))
            .inject_by_type::<UserDao>("dao", true)
            .inject_by_name("momentDao", "MomentDao", true)
            .inject_all::<dyn Dao>("allDaos")
            .value("motd", "Hello:${user.name}", true)
            .on_init(move |_, ctx| {
                // Dependencies are ready before the init hook runs.
                assert!(ctx.app.get_by_name("UserDao").is_some());
                init_events.lock().push("init:UserService".to_string());
                Ok(())
            })
            .on_destroy(move |_, _| {
                destroy_events.lock().push("destroy:UserService".to_string());
                Ok(())
            }),
    )
    .unwrap();

    let runner_events = Arc::clone(&events);
    app.runner(move |app| {
        let service = app.get_by_type::<UserService>()?;
        let service = service.read();
        assert!(service.dao.is_some());
        assert!(service.moment_dao.is_some());
        assert_eq!(service.motd, "Hello:Arvin");
        // Collection sorted ascending by order: MomentDao (1), UserDao (2).
        let tables: Vec<&str> = service.all_daos.iter().map(|d| d.read().table()).collect();
        assert_eq!(tables, ["moment", "user"]);
        runner_events.lock().push("run".to_string());
        Ok(())
    });

    app.run().unwrap();
    assert_eq!(app.name().as_deref(), Some("wiring-test"));
    assert_eq!(
        *events.lock(),
        ["init:UserService", "run", "destroy:UserService"]
    );
}

#[test]
fn destroy_hooks_run_in_reverse_readiness_order() {
    let env = test_env(&[]);
    let app = Application::new(env);
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));

    for name in ["first", "second", "third"] {
        let log = Arc::clone(&events);
        app.register(
            Registration::new(Arc::new(RwLock::new(MomentDao)))
                .named(name)
                .on_destroy(move |_, _| {
                    log.lock().push(name.to_string());
                    Ok(())
                }),
        )
        .unwrap();
    }

    app.run().unwrap();
    assert_eq!(*events.lock(), ["third", "second", "first"]);
}

struct Pinger;
struct Ponger;
impl Component for Pinger {
    fn assign(&mut self, _field: &str, _value: Injected) -> AppResult<()> {
        Ok(())
    }
}
impl Component for Ponger {
    fn assign(&mut self, _field: &str, _value: Injected) -> AppResult<()> {
        Ok(())
    }
}

#[test]
fn dependency_cycle_aborts_before_init_hooks() {
    let env = test_env(&[]);
    let app = Application::new(env);
    let initialized = Arc::new(Mutex::new(false));

    let flag = Arc::clone(&initialized);
    app.register(
        Registration::new(Arc::new(RwLock::new(Pinger)))
            .inject_by_type::<Ponger>("peer", true)
            .on_init(move |_, _| {
                *flag.lock() = true;
                Ok(())
            }),
    )
    .unwrap();
    app.register(
        Registration::new(Arc::new(RwLock::new(Ponger))).inject_by_type::<Pinger>("peer", true),
    )
    .unwrap();

    let err = app.run().unwrap_err();
    match err {
        AppError::CyclicDependency { chain } => {
            assert!(chain.contains("Pinger"));
            assert!(chain.contains("Ponger"));
            assert!(chain.contains(" -> "));
        }
        other => panic!("expected cycle, got {other}"),
    }
    assert!(!*initialized.lock());
}

#[test]
fn required_dependency_must_exist_but_optional_may_not() {
    let env = test_env(&[]);
    let app = Application::new(env);
    app.register(
        Registration::new(Arc::new(RwLock::new(Pinger)))
            .inject_by_type::<Ponger>("peer", false),
    )
    .unwrap();
    // Optional absence is fine.
    app.run().unwrap();

    let env = test_env(&[]);
    let app = Application::new(env);
    app.register(
        Registration::new(Arc::new(RwLock::new(Pinger))).inject_by_name("peer", "ghost", true),
    )
    .unwrap();
    assert!(matches!(
        app.run(),
        Err(AppError::MissingRequiredDependency { .. })
    ));
}

#[test]
fn ambiguous_by_type_lookup_needs_a_primary() {
    let env = test_env(&[]);
    let app = Application::new(env);
    app.register(dao_registration(UserDao).named("a")).unwrap();
    app.register(dao_registration(MomentDao).named("b")).unwrap();
    app.register(
        Registration::new(Arc::new(RwLock::new(Pinger))).inject_by_type::<dyn Dao>("peer", true),
    )
    .unwrap();
    assert!(matches!(app.run(), Err(AppError::LookupAmbiguous { .. })));

    let env = test_env(&[]);
    let app = Application::new(env);
    app.register(dao_registration(UserDao).named("a")).unwrap();
    app.register(dao_registration(MomentDao).named("b").primary())
        .unwrap();
    app.register(
        Registration::new(Arc::new(RwLock::new(Pinger))).inject_by_type::<dyn Dao>("peer", true),
    )
    .unwrap();
    app.run().unwrap();
}

#[test]
fn duplicate_names_are_rejected_at_registration() {
    let env = test_env(&[]);
    let app = Application::new(env);
    app.register(dao_registration(UserDao)).unwrap();
    assert!(matches!(
        app.register(dao_registration(UserDao)),
        Err(AppError::DuplicateRegistration { .. })
    ));
}

#[derive(Default)]
struct ServerConfig {
    port: i64,
    host: String,
}

impl Component for ServerConfig {}

impl Bindable for ServerConfig {
    fn fields(&self) -> Vec<BindField> {
        vec![
            BindField::new("port", BindKind::I64),
            BindField::new("host", BindKind::Text).with_default("localhost"),
        ]
    }

    fn apply(&mut self, field: &str, value: BindValue) -> EnvResult<()> {
        match (field, value) {
            ("port", BindValue::I64(v)) => self.port = v,
            ("host", BindValue::Text(v)) => self.host = v,
            _ => {}
        }
        Ok(())
    }
}

#[test]
fn config_backed_component_binds_from_environment() {
    let env = test_env(&["--server.port=8080"]);
    let app = Application::new(env);
    app.register(Registration::config(
        Arc::new(RwLock::new(ServerConfig::default())),
        "server",
    ))
    .unwrap();
    app.run().unwrap();

    let config = app.get_by_type::<ServerConfig>().unwrap();
    assert_eq!(config.read().port, 8080);
    assert_eq!(config.read().host, "localhost");
}

#[test]
fn application_name_resolves_from_configuration() {
    let env = test_env(&["--kestrel.application.name=orders"]);
    let app = Application::new(env);
    assert_eq!(app.name(), None);
    app.run().unwrap();
    assert_eq!(app.name().as_deref(), Some("orders"));
}
