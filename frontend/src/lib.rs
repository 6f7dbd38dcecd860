// GoVote browser client
extern crate console_error_panic_hook;

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod persisted;
pub mod query_result;
pub mod session;
pub mod vote;

use std::cell::RefCell;
use std::rc::Rc;

use log::error;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, HtmlElement, HtmlInputElement};

use crate::config::ClientConfig;
use crate::connection::{ApiConnection, ApiGateway};
use crate::persisted::LoginParams;
use crate::query_result::PostDetail;
use crate::session::{LocalStorage, SessionBroadcast, SessionRecord, SessionView, StorageListener, Subscription};
use crate::vote::{Direction, VoteEngine, VoteState};

pub const ROOT_SELECTOR: &str = "#govote_root";

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console, js_name = log)]
    pub fn console_log(contents: &str);
}

#[cfg(target_arch = "wasm32")]
struct ConsoleLogger;

#[cfg(target_arch = "wasm32")]
impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            console_log(&format!("{} {}", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

#[cfg(target_arch = "wasm32")]
pub fn init_logger() {
    static LOGGER: ConsoleLogger = ConsoleLogger;

    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(log::LevelFilter::Debug);
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub fn init_logger() {
    use std::io::Write;

    let _ = env_logger::builder()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .is_test(true)
        .try_init();
}

struct App {
    config: ClientConfig,
    session: SessionBroadcast,
    gateway: Rc<dyn ApiGateway>,
}

// Everything that has to be torn down when the page is bootstrapped again.
struct Page {
    _storage_listener: StorageListener,
    _header_view: Rc<SessionView>,
    _header_subscription: Subscription,
}

thread_local! {
    static PAGE: RefCell<Option<Page>> = RefCell::new(None);
}

#[wasm_bindgen]
pub fn bootstrap(config_json: Option<String>) {
    std::panic::set_hook(Box::new(console_error_panic_hook::hook));
    init_logger();

    if let Err(err) = start(config_json) {
        error!("bootstrap failed: {:?}", err);
    }
}

fn start(config_json: Option<String>) -> Result<(), JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;

    let config = match config_json {
        Some(json) => ClientConfig::from_json(&json)
            .map_err(|err| JsValue::from_str(&format!("invalid config: {}", err)))?,
        None => ClientConfig::default(),
    };
    let config = config.with_origin(&window.location().origin()?);

    let store = LocalStorage::from_window(&window)
        .ok_or_else(|| JsValue::from_str("localStorage unavailable"))?;
    let session = SessionBroadcast::from_config(store, &config);
    let gateway: Rc<dyn ApiGateway> = Rc::new(ApiConnection::new(&config, session.clone()));

    let storage_listener = session.attach_storage_listener(&window)?;

    let app = Rc::new(App {
        config,
        session,
        gateway,
    });

    let (document, root) = document_and_root()?;
    root.set_inner_html("");

    let header = document.create_element("div")?;
    root.append_child(&header)?;

    let posts = document.create_element("div")?;
    root.append_child(&posts)?;

    let header_view = Rc::new(SessionView::new(app.session.clone()));
    render_header(&app, &header, header_view.visible().as_ref())?;

    let app0 = app.clone();
    let header_subscription = SessionView::watch(&header_view, move |record| {
        if let Err(err) = render_header(&app0, &header, record) {
            error!("could not render header: {:?}", err);
        }
    });

    PAGE.with(|page| {
        *page.borrow_mut() = Some(Page {
            _storage_listener: storage_listener,
            _header_view: header_view,
            _header_subscription: header_subscription,
        });
    });

    load_posts(app, posts);

    Ok(())
}

pub fn document_and_root() -> Result<(Document, Element), JsValue> {
    let document = web_sys::window()
        .and_then(|window| window.document())
        .ok_or_else(|| JsValue::from_str("no document"))?;
    let root = document
        .query_selector(ROOT_SELECTOR)?
        .ok_or_else(|| JsValue::from_str("missing root element"))?;

    Ok((document, root))
}

fn on_click(element: &Element, handler: impl FnMut() + 'static) -> Result<(), JsValue> {
    let closure = Closure::<dyn FnMut()>::new(handler);

    element
        .dyn_ref::<HtmlElement>()
        .ok_or_else(|| JsValue::from_str("not an html element"))?
        .set_onclick(Some(closure.as_ref().unchecked_ref()));

    closure.forget();
    Ok(())
}

fn input_value(element: &Element) -> String {
    element
        .dyn_ref::<HtmlInputElement>()
        .map(|input| input.value())
        .unwrap_or_default()
}

fn render_header(
    app: &Rc<App>,
    header: &Element,
    record: Option<&SessionRecord>,
) -> Result<(), JsValue> {
    let document = document_and_root()?.0;
    header.set_inner_html("");

    if let Some(record) = record {
        let username_label = document.create_element("span")?;
        username_label.set_text_content(Some(&("Username: ".to_owned() + &record.user.username)));
        header.append_child(&username_label)?;

        let logout = document.create_element("button")?;
        logout.set_text_content(Some("Log out"));
        header.append_child(&logout)?;

        let session = app.session.clone();
        on_click(&logout, move || auth::logout(&session))?;

        return Ok(());
    }

    let username = document.create_element("input")?;
    username.set_attribute("placeholder", "Username")?;
    header.append_child(&username)?;

    let password = document.create_element("input")?;
    password.set_attribute("placeholder", "Password")?;
    password.set_attribute("type", "password")?;
    header.append_child(&password)?;

    let login = document.create_element("button")?;
    login.set_text_content(Some("Log in"));
    header.append_child(&login)?;

    let login_error = document.create_element("span")?;
    header.append_child(&login_error)?;

    let app = app.clone();
    on_click(&login, move || {
        let params = LoginParams {
            username: input_value(&username),
            password: input_value(&password),
        };
        let app = app.clone();
        let login_error = login_error.clone();

        wasm_bindgen_futures::spawn_local(async move {
            // on success the header re-renders through the session listener
            if let Err(err) = auth::login(app.gateway.as_ref(), &app.session, &params).await {
                login_error.set_text_content(Some(&err.to_string()));
            }
        });
    })?;

    Ok(())
}

fn load_posts(app: Rc<App>, container: Element) {
    wasm_bindgen_futures::spawn_local(async move {
        let params = app.config.first_page(None);

        match app.gateway.posts(&params).await {
            Ok(posts) => {
                for post in posts {
                    if let Err(err) = render_post(&app, &container, &post) {
                        error!("could not render post {}: {:?}", post.post.id, err);
                    }
                }
            }
            Err(err) => container.set_text_content(Some(&err.to_string())),
        }
    });
}

fn render_post(app: &Rc<App>, container: &Element, post: &PostDetail) -> Result<(), JsValue> {
    let document = document_and_root()?.0;

    let post_el = document.create_element("div")?;
    container.append_child(&post_el)?;

    let title = document.create_element("h3")?;
    title.set_text_content(Some(&post.post.title));
    post_el.append_child(&title)?;

    let author = document.create_element("h6")?;
    author.set_text_content(Some(&post.author_name));
    post_el.append_child(&author)?;

    let content = document.create_element("p")?;
    content.set_text_content(Some(&post.post.content));
    post_el.append_child(&content)?;

    let engine = Rc::new(VoteEngine::for_post(
        post,
        app.gateway.clone(),
        app.session.clone(),
    ));
    render_vote_widget(&document, &post_el, engine)
}

fn render_vote_widget(
    document: &Document,
    parent: &Element,
    engine: Rc<VoteEngine>,
) -> Result<(), JsValue> {
    let up = document.create_element("button")?;
    up.set_text_content(Some("▲"));
    parent.append_child(&up)?;

    let tally = document.create_element("span")?;
    parent.append_child(&tally)?;

    let down = document.create_element("button")?;
    down.set_text_content(Some("▼"));
    parent.append_child(&down)?;

    let vote_error = document.create_element("span")?;
    parent.append_child(&vote_error)?;

    let paint = {
        let (up, tally, down) = (up.clone(), tally.clone(), down.clone());
        move |state: VoteState| {
            tally.set_text_content(Some(&state.tally.to_string()));
            up.set_class_name(if state.direction == Direction::Up { "voted" } else { "" });
            down.set_class_name(if state.direction == Direction::Down { "voted" } else { "" });
        }
    };
    paint(engine.state());
    engine.init_on_change(Box::new(paint));

    for (button, direction) in [(&up, Direction::Up), (&down, Direction::Down)] {
        let engine = engine.clone();
        let vote_error = vote_error.clone();

        on_click(button, move || {
            let engine = engine.clone();
            let vote_error = vote_error.clone();

            wasm_bindgen_futures::spawn_local(async move {
                match engine.apply_vote(direction).await {
                    Ok(_) => vote_error.set_text_content(None),
                    Err(err) => vote_error.set_text_content(Some(&err.to_string())),
                }
            });
        })?;
    }

    Ok(())
}
