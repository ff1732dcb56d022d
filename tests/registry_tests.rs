//! External tests for the registry and bundle loading: page-scoped wiring,
//! global exclusion and the logs emitted along the way.

use std::{
    io,
    sync::{Arc, Mutex},
};

use wave_bucket::{
    page::StaticPage,
    random::ScriptedSource,
    store::{CookieJar, MemoryJar},
    telemetry::{RecordingTelemetry, TracingTelemetry},
    Bundle, Exclusion, GlobalOptions, Registry, Trigger,
};

const BUNDLE: &str = r#"
[options]
cookieDomain = "example.com"

[[waves]]
id = "nav"
name = "Navigation"
state = "live"

[waves.recipes.0]
name = "Control"
[waves.recipes.1]
name = "Mega menu"
css = ".nav{display:grid}"

[[waves]]
id = "price"
name = "Price display"
state = "live"
divertTo = "1"
[waves.options]
cookieDurationDays = 7

[waves.recipes.0]
name = "Monthly"
[waves.recipes.1]
name = "Yearly"

[[waves]]
id = "old"
name = "Old"
state = "inactive"
"#;

#[derive(Clone)]
struct TestLogWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for TestLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn with_captured_logs<R>(run: impl FnOnce() -> R) -> (R, String) {
    let buffer = Arc::new(Mutex::new(Vec::<u8>::new()));
    let writer_buffer = Arc::clone(&buffer);
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .without_time()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(move || TestLogWriter { buffer: Arc::clone(&writer_buffer) })
        .finish();
    let result = tracing::subscriber::with_default(subscriber, run);
    let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    (result, logs)
}

fn registry(bundle: &Bundle, jar: &MemoryJar, page: &StaticPage, telemetry: &RecordingTelemetry) -> Registry {
    Registry::new(bundle.options.clone(), Arc::new(jar.clone()), Arc::new(page.clone()))
        .with_telemetry(Arc::new(telemetry.clone()))
        .with_random(|_| Box::new(ScriptedSource::new(vec![0.0, 0.9])))
}

#[test]
fn test_bundle_registers_active_waves_in_order() {
    let mut bundle = Bundle::from_toml_str(BUNDLE).unwrap();
    bundle.default_trigger(Trigger::immediate());
    let (jar, page, telemetry) = (MemoryJar::new(), StaticPage::new(), RecordingTelemetry::new());
    let mut reg = registry(&bundle, &jar, &page, &telemetry);

    let ids = bundle.register(&mut reg).unwrap();
    assert_eq!(ids, vec!["nav".to_string(), "price".to_string()]);
    assert!(reg.get("old").is_none());

    assert_eq!(jar.get("_wave_nav").as_deref(), Some("1.1"));
    assert!(jar.get("_wave_price").is_none());
    assert_eq!(page.styles(), vec![".nav{display:grid}".to_string()]);
    assert_eq!(telemetry.exposures(), 1);
}

#[test]
fn test_cookie_attributes_follow_merged_options() {
    let mut bundle = Bundle::from_toml_str(BUNDLE).unwrap();
    bundle.default_trigger(Trigger::deferred());
    let (jar, page, telemetry) = (MemoryJar::new(), StaticPage::new(), RecordingTelemetry::new());
    let mut reg = registry(&bundle, &jar, &page, &telemetry);
    bundle.register(&mut reg).unwrap();

    assert_eq!(reg.get("nav").unwrap().options().cookie_duration_days, 60);
    assert_eq!(reg.get("price").unwrap().options().cookie_duration_days, 7);

    reg.activate("nav");
    let attrs = jar.attributes("_wave_nav").unwrap();
    assert_eq!(attrs.domain.as_deref(), Some("example.com"));
    assert_eq!(attrs.max_age_days, 60);
}

#[test]
fn test_excluded_page_registers_nothing_and_warns() {
    let mut bundle = Bundle::from_toml_str(BUNDLE).unwrap();
    bundle.default_trigger(Trigger::immediate());
    let (jar, page, telemetry) = (MemoryJar::new(), StaticPage::new(), RecordingTelemetry::new());
    let mut reg = registry(&bundle, &jar, &page, &telemetry).with_exclusion(Exclusion::cookies_disabled(false));

    let (ids, logs) = with_captured_logs(|| bundle.register(&mut reg).unwrap());
    assert!(ids.is_empty());
    assert!(reg.is_empty());
    assert_eq!(jar.write_count(), 0);
    assert!(telemetry.is_empty());
    assert!(logs.contains("WARN"), "{logs}");
    assert!(logs.contains("nav"), "{logs}");
}

#[test]
fn test_removed_recipe_logs_warning() {
    let mut bundle = Bundle::from_toml_str(BUNDLE).unwrap();
    bundle.default_trigger(Trigger::deferred());
    let jar = MemoryJar::new().with("_wave_nav", "1.2");
    let (page, telemetry) = (StaticPage::new(), RecordingTelemetry::new());
    let mut reg = registry(&bundle, &jar, &page, &telemetry);
    bundle.register(&mut reg).unwrap();

    let (activated, logs) = with_captured_logs(|| reg.activate("nav"));
    assert_eq!(activated, Some(false));
    assert!(logs.contains("stored recipe no longer exists"), "{logs}");
    assert_eq!(jar.get("_wave_nav").as_deref(), Some("0.2"));
}

#[test]
fn test_preview_link_through_registry() {
    let mut bundle = Bundle::from_toml_str(BUNDLE).unwrap();
    bundle.default_trigger(Trigger::immediate());
    let (jar, telemetry) = (MemoryJar::new(), RecordingTelemetry::new());
    let page = StaticPage::with_query("?wave_nav=0&utm_source=mail");
    let mut reg = registry(&bundle, &jar, &page, &telemetry);
    bundle.register(&mut reg).unwrap();

    assert_eq!(reg.get("nav").unwrap().chosen_recipe().unwrap().name, "Control");
    assert_eq!(jar.get("_wave_nav").as_deref(), Some("1.0"));
}

#[test]
fn test_custom_global_options_rename_keys() {
    let mut bundle = Bundle::from_toml_str(BUNDLE).unwrap();
    bundle.options = GlobalOptions { cookie_prefix: "_ab".into(), preview_prefix: "ab".into(), ..bundle.options };
    bundle.default_trigger(Trigger::immediate());
    let (jar, telemetry) = (MemoryJar::new(), RecordingTelemetry::new());
    let page = StaticPage::with_query("ab_nav=0");
    let mut reg = registry(&bundle, &jar, &page, &telemetry);
    bundle.register(&mut reg).unwrap();

    assert_eq!(jar.get("_ab_nav").as_deref(), Some("1.0"));
    assert!(jar.get("_wave_nav").is_none());
}

#[test]
fn test_tracing_telemetry_logs_exposure_and_failure() {
    let mut bundle = Bundle::from_toml_str(BUNDLE).unwrap();
    bundle.default_trigger(Trigger::immediate());
    assert!(bundle.bind_behavior("nav", "1", |_| Err("menu root missing".into())));
    let mut reg = Registry::new(bundle.options.clone(), Arc::new(MemoryJar::new()), Arc::new(StaticPage::new()))
        .with_telemetry(Arc::new(TracingTelemetry))
        .with_random(|_| Box::new(ScriptedSource::new(vec![0.0, 0.9])));

    let (ids, logs) = with_captured_logs(|| bundle.register(&mut reg).unwrap());
    assert_eq!(ids.len(), 2);
    assert!(logs.contains("wave_bucket::telemetry"), "{logs}");
    assert!(logs.contains("exposure"), "{logs}");
    assert!(logs.contains("recipe failure"), "{logs}");
    assert!(logs.contains("menu root missing"), "{logs}");
    assert!(!reg.get("nav").unwrap().report().unwrap().executed);
}
