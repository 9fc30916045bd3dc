use async_stream::stream;
use futures::stream::BoxStream;
use scraper::Html;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::PortalError;
use crate::models::{ProgressEvent, SearchCriteria, Step};
use crate::scrapers::delta::{is_delta, parse_delta, PartialPage};
use crate::scrapers::extract::{parse_tokens, ResultsPage};
use crate::scrapers::protocol::{self, PostMode, Selection};
use crate::scrapers::session::ReqwestSessionFactory;
use crate::scrapers::tokens::StateTokens;
use crate::scrapers::traits::{PortalSession, SessionFactory};
use crate::scrapers::types::{ScraperConfig, SearchType};

/// Lazy, single-pass sequence of events for one year.
pub type EventStream = BoxStream<'static, ProgressEvent>;

/// Drives the portal's search workflow, one fresh session per year.
pub struct PortalScraper<F = ReqwestSessionFactory> {
    factory: Arc<F>,
    config: ScraperConfig,
}

impl PortalScraper {
    /// Create a scraper against the live portal
    pub fn new(search_type: SearchType) -> Self {
        Self::with_config(ScraperConfig::new(search_type))
    }

    pub fn with_config(config: ScraperConfig) -> Self {
        Self::with_factory(ReqwestSessionFactory::new(config.clone()), config)
    }
}

impl Default for PortalScraper {
    fn default() -> Self {
        Self::new(SearchType::Buyer)
    }
}

impl<F: SessionFactory + 'static> PortalScraper<F> {
    pub fn with_factory(factory: F, config: ScraperConfig) -> Self {
        Self {
            factory: Arc::new(factory),
            config,
        }
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    /// Scrape one year. See [`PortalScraper::scrape`].
    pub fn scrape_year(
        &self,
        district_id: &str,
        office_id: &str,
        year: &str,
        name_pattern: &str,
    ) -> EventStream {
        self.scrape(SearchCriteria::new(district_id, office_id, year, name_pattern))
    }

    /// Walk the whole workflow for `criteria` in a new session.
    ///
    /// Nothing happens until the stream is polled. The session is opened on
    /// first poll and dropped with the stream, whether it ran to `Done`,
    /// stopped at an `Error` or was abandoned by the caller.
    pub fn scrape(&self, criteria: SearchCriteria) -> EventStream {
        let factory = Arc::clone(&self.factory);
        let delay = self.config.step_delay;
        let search_type = self.config.search_type;

        Box::pin(stream! {
            let year = criteria.year.clone();
            info!("Starting {} search session for year {}", search_type, year);

            let mut session = match factory.open_session() {
                Ok(session) => session,
                Err(e) => {
                    warn!("Could not open session: {}", e);
                    yield ProgressEvent::Error(PortalError::network(Step::Init, e));
                    return;
                }
            };

            let mut tokens = match load_form(&mut session).await {
                Ok(tokens) => tokens,
                Err(e) => {
                    warn!("{}", e);
                    yield ProgressEvent::Error(e);
                    return;
                }
            };
            yield ProgressEvent::info(format!("Started session for year {}", year));

            for selection in Selection::ORDER {
                pause(delay).await;
                tokens = match select(&mut session, selection, &criteria, tokens).await {
                    Ok(tokens) => tokens,
                    Err(e) => {
                        warn!("{}", e);
                        yield ProgressEvent::Error(e);
                        return;
                    }
                };
                yield ProgressEvent::info(describe(selection, &criteria));
            }

            pause(delay).await;
            let (mut tokens, mut results) = match submit(&mut session, &criteria, tokens).await {
                Ok(submitted) => submitted,
                Err(e) => {
                    warn!("{}", e);
                    yield ProgressEvent::Error(e);
                    return;
                }
            };
            yield ProgressEvent::info(format!("Searched for '{}'", criteria.name_pattern));

            let mut page = 1;
            let mut total = 0;
            loop {
                let ResultsPage { records, next_page, .. } = results;
                total += records.len();
                info!("Year {}, page {}: {} records", year, page, records.len());
                yield ProgressEvent::Data {
                    year: year.clone(),
                    page,
                    count: records.len(),
                    records,
                };

                let argument = match next_page {
                    Some(argument) => argument,
                    None => break,
                };

                pause(delay).await;
                match turn_page(&mut session, &criteria, tokens, &argument, page + 1).await {
                    Ok((next_tokens, next_results)) => {
                        tokens = next_tokens;
                        results = next_results;
                        page += 1;
                    }
                    Err(e) => {
                        warn!("{}", e);
                        yield ProgressEvent::Error(e);
                        return;
                    }
                }
                yield ProgressEvent::info(format!("Loaded page {}", page));
            }

            info!("Year {} done: {} records", year, total);
            yield ProgressEvent::Done { year, total };
        })
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

fn describe(selection: Selection, criteria: &SearchCriteria) -> String {
    let what = match selection {
        Selection::District => "district",
        Selection::Office => "office",
        Selection::Year => "year",
    };
    format!("Selected {} {}", what, selection.value(criteria))
}

/// Step 1: fetch the empty form and pick up its tokens.
async fn load_form<S: PortalSession>(session: &mut S) -> Result<StateTokens, PortalError> {
    let body = session
        .load_form()
        .await
        .map_err(|e| PortalError::network(Step::Init, e))?;

    form_tokens(Step::Init, &body, StateTokens::default())
}

/// Steps 2-4: one dropdown change as an async postback.
async fn select<S: PortalSession>(
    session: &mut S,
    selection: Selection,
    criteria: &SearchCriteria,
    tokens: StateTokens,
) -> Result<StateTokens, PortalError> {
    let step = selection.step();
    let form = protocol::selection_form(selection, criteria, &tokens);
    let body = session
        .post_form(PostMode::Partial, &form)
        .await
        .map_err(|e| PortalError::network(step, e))?;

    let partial = PartialPage::from_updates(parse_delta(&body));
    if partial.tokens.is_empty() && partial.panels.is_empty() {
        warn!("{} response carried no delta segments", step);
    }
    debug!(
        "{}: {} panel(s), tokens updated: {}",
        step,
        partial.panels.len(),
        !partial.tokens.is_empty()
    );

    Ok(tokens.merged(partial.tokens))
}

/// Step 5: the full-page search postback.
async fn submit<S: PortalSession>(
    session: &mut S,
    criteria: &SearchCriteria,
    tokens: StateTokens,
) -> Result<(StateTokens, ResultsPage), PortalError> {
    let form = protocol::search_form(criteria, &tokens);
    let body = session
        .post_form(PostMode::Full, &form)
        .await
        .map_err(|e| PortalError::network(Step::Submit, e))?;

    read_results(&body, 1, tokens)
        .map_err(|missing| PortalError::parse(Step::Submit, missing_message(&missing)))
}

/// One pager click, landing on `page`.
async fn turn_page<S: PortalSession>(
    session: &mut S,
    criteria: &SearchCriteria,
    tokens: StateTokens,
    argument: &str,
    page: u32,
) -> Result<(StateTokens, ResultsPage), PortalError> {
    let form = protocol::page_form(criteria, &tokens, argument);
    let body = session
        .post_form(PostMode::Full, &form)
        .await
        .map_err(|e| PortalError::Pagination {
            page,
            message: e.to_string(),
        })?;

    read_results(&body, page, tokens).map_err(|missing| PortalError::Pagination {
        page,
        message: missing_message(&missing),
    })
}

/// A results response is normally a full page, which must carry every token.
/// When it comes back as a delta the grid is read from the panel markup and
/// only the tokens it names are updated.
fn read_results(
    body: &str,
    page: u32,
    tokens: StateTokens,
) -> Result<(StateTokens, ResultsPage), Vec<&'static str>> {
    if is_delta(body) {
        let results = ResultsPage::from_partial(PartialPage::from_updates(parse_delta(body)), page);
        debug!("Page {} arrived as a delta", page);
        return Ok((tokens.merged(results.tokens.clone()), results));
    }

    let results = ResultsPage::parse(body, page);
    let tokens = tokens.replaced(results.tokens.clone())?;
    Ok((tokens, results))
}

fn form_tokens(step: Step, body: &str, tokens: StateTokens) -> Result<StateTokens, PortalError> {
    let update = parse_tokens(&Html::parse_document(body));
    tokens
        .replaced(update)
        .map_err(|missing| PortalError::parse(step, missing_message(&missing)))
}

fn missing_message(missing: &[&str]) -> String {
    format!("page is missing {}", missing.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::models::PropertyRecord;
    use crate::scrapers::protocol::{EVENT_ARGUMENT, EVENT_TARGET, FormFields, VIEW_STATE};
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    type Reply = Result<String, TransportError>;

    /// Replays canned responses and records what was sent.
    struct CannedSession {
        replies: VecDeque<Reply>,
        sent: Arc<Mutex<Vec<(Option<PostMode>, FormFields)>>>,
        sent_at: Arc<Mutex<Vec<Instant>>>,
        released: Arc<AtomicUsize>,
    }

    impl CannedSession {
        fn next_reply(&mut self, mode: Option<PostMode>, form: FormFields) -> Reply {
            self.sent.lock().unwrap().push((mode, form));
            self.sent_at.lock().unwrap().push(Instant::now());
            self.replies.pop_front().unwrap_or(Err(TransportError::Timeout))
        }
    }

    impl Drop for CannedSession {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl PortalSession for CannedSession {
        async fn load_form(&mut self) -> Result<String, TransportError> {
            self.next_reply(None, Vec::new())
        }

        async fn post_form(&mut self, mode: PostMode, form: &FormFields) -> Result<String, TransportError> {
            self.next_reply(Some(mode), form.clone())
        }
    }

    struct CannedFactory {
        replies: Mutex<Option<Vec<Reply>>>,
        sent: Arc<Mutex<Vec<(Option<PostMode>, FormFields)>>>,
        sent_at: Arc<Mutex<Vec<Instant>>>,
        opened: Arc<Mutex<u32>>,
        released: Arc<AtomicUsize>,
    }

    impl CannedFactory {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(Some(replies)),
                sent: Arc::default(),
                sent_at: Arc::default(),
                opened: Arc::default(),
                released: Arc::default(),
            }
        }
    }

    impl SessionFactory for CannedFactory {
        type Session = CannedSession;

        fn open_session(&self) -> Result<CannedSession, TransportError> {
            *self.opened.lock().unwrap() += 1;
            let replies = self.replies.lock().unwrap().take().unwrap_or_default();
            Ok(CannedSession {
                replies: replies.into(),
                sent: Arc::clone(&self.sent),
                sent_at: Arc::clone(&self.sent_at),
                released: Arc::clone(&self.released),
            })
        }
    }

    fn form_page(vs: &str) -> String {
        format!(
            r#"<html><body><form>
            <input type="hidden" id="__VIEWSTATE" value="{vs}" />
            <input type="hidden" id="__VIEWSTATEGENERATOR" value="GEN" />
            <input type="hidden" id="__EVENTVALIDATION" value="EV-{vs}" />
            </form></body></html>"#
        )
    }

    fn results_page(vs: &str, rows: usize, next: Option<u32>) -> String {
        let cells: String = (0..13).map(|i| format!("<td>c{}</td>", i)).collect();
        let body: String = (0..rows).map(|_| format!("<tr>{}</tr>", cells)).collect();
        let pager = next
            .map(|n| format!("<tr><td><a href=\"javascript:__doPostBack('ctl00$MainContent$GridView2','Page${}')\">{}</a></td></tr>", n, n))
            .unwrap_or_default();
        format!(
            r#"<html><body><form>
            <input type="hidden" id="__VIEWSTATE" value="{vs}" />
            <input type="hidden" id="__VIEWSTATEGENERATOR" value="GEN" />
            <input type="hidden" id="__EVENTVALIDATION" value="EV-{vs}" />
            <table id="GridView2"><tr><th>Village</th></tr>{body}{pager}</table>
            </form></body></html>"#
        )
    }

    fn delta(vs: &str) -> String {
        format!("{}|hiddenField|__VIEWSTATE|{}|", vs.len(), vs)
    }

    /// A results grid delivered inside an update panel.
    fn results_delta(vs: &str, rows: usize) -> String {
        let cells: String = (0..13).map(|i| format!("<td>r{}</td>", i)).collect();
        let body: String = (0..rows).map(|_| format!("<tr>{}</tr>", cells)).collect();
        let markup = format!(r#"<table id="GridView2"><tr><th>Village</th></tr>{body}</table>"#);
        format!(
            "{}|updatePanel|ctl00_MainContent_UpdatePanel1|{}|{}|hiddenField|__VIEWSTATE|{}|",
            markup.encode_utf16().count(),
            markup,
            vs.len(),
            vs
        )
    }

    fn two_page_replies() -> Vec<Reply> {
        vec![
            Ok(form_page("v0")),
            Ok(delta("v1")),
            Ok(delta("v2")),
            Ok(delta("v3")),
            Ok(results_page("p1", 5, Some(2))),
            Ok(results_page("p2", 3, None)),
        ]
    }

    fn scraper(factory: CannedFactory) -> PortalScraper<CannedFactory> {
        let config = ScraperConfig::default().with_step_delay(Duration::ZERO);
        PortalScraper::with_factory(factory, config)
    }

    fn kinds(events: &[ProgressEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| match e {
                ProgressEvent::Info { .. } => "info",
                ProgressEvent::Error(_) => "error",
                ProgressEvent::Data { .. } => "data",
                ProgressEvent::Done { .. } => "done",
            })
            .collect()
    }

    #[tokio::test]
    async fn test_single_page_sequence() {
        let factory = CannedFactory::new(vec![
            Ok(form_page("v0")),
            Ok(delta("v1")),
            Ok(delta("v2")),
            Ok(delta("v3")),
            Ok(results_page("v4", 1, None)),
        ]);
        let sent = Arc::clone(&factory.sent);
        let events: Vec<_> = scraper(factory).scrape_year("12", "03", "2019", "Ram").collect().await;

        assert_eq!(
            kinds(&events),
            vec!["info", "info", "info", "info", "info", "data", "done"]
        );
        match &events[5] {
            ProgressEvent::Data { year, page, count, records } => {
                assert_eq!(year, "2019");
                assert_eq!(*page, 1);
                assert_eq!(*count, 1);
                assert_eq!(records[0].village, "c0");
                assert_eq!(records[0].market_value, "c12");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            events[6],
            ProgressEvent::Done {
                year: "2019".to_string(),
                total: 1
            }
        );

        // Each postback echoes the tokens of the response before it.
        let sent = sent.lock().unwrap();
        let view_states: Vec<&str> = sent[1..]
            .iter()
            .map(|(_, form)| {
                form.iter()
                    .find(|(k, _)| *k == VIEW_STATE)
                    .map(|(_, v)| v.as_str())
                    .unwrap_or_default()
            })
            .collect();
        assert_eq!(view_states, vec!["v0", "v1", "v2", "v3"]);

        let modes: Vec<Option<PostMode>> = sent.iter().map(|(mode, _)| *mode).collect();
        assert_eq!(
            modes,
            vec![
                None,
                Some(PostMode::Partial),
                Some(PostMode::Partial),
                Some(PostMode::Partial),
                Some(PostMode::Full)
            ]
        );
    }

    #[tokio::test]
    async fn test_two_pages_then_done() {
        let factory = CannedFactory::new(two_page_replies());
        let sent = Arc::clone(&factory.sent);
        let events: Vec<_> = scraper(factory).scrape_year("12", "03", "2019", "A").collect().await;

        let pages: Vec<(u32, usize)> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Data { page, count, .. } => Some((*page, *count)),
                _ => None,
            })
            .collect();
        assert_eq!(pages, vec![(1, 5), (2, 3)]);
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Done {
                year: "2019".to_string(),
                total: 8
            })
        );

        let sent = sent.lock().unwrap();
        let (mode, pager_form) = sent.last().unwrap();
        assert_eq!(*mode, Some(PostMode::Full));
        let field = |name: &str| {
            pager_form
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(field(EVENT_TARGET).as_deref(), Some(protocol::RESULTS_GRID));
        assert_eq!(field(EVENT_ARGUMENT).as_deref(), Some("Page$2"));
        assert_eq!(field(VIEW_STATE).as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn test_district_failure_stops_after_init() {
        let factory = CannedFactory::new(vec![
            Ok(form_page("v0")),
            Err(TransportError::Connect("connection reset".to_string())),
        ]);
        let events: Vec<_> = scraper(factory).scrape_year("12", "03", "2019", "A").collect().await;

        assert_eq!(kinds(&events), vec!["info", "error"]);
        match &events[1] {
            ProgressEvent::Error(err) => assert_eq!(err.step(), Step::SelectDistrict),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_init_without_tokens_is_a_parse_error() {
        let factory = CannedFactory::new(vec![Ok("<html><body>down</body></html>".to_string())]);
        let events: Vec<_> = scraper(factory).scrape_year("12", "03", "2019", "A").collect().await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ProgressEvent::Error(PortalError::Parse { step: Step::Init, .. })
        ));
    }

    #[tokio::test]
    async fn test_pagination_failure_keeps_earlier_pages() {
        let factory = CannedFactory::new(vec![
            Ok(form_page("v0")),
            Ok(delta("v1")),
            Ok(delta("v2")),
            Ok(delta("v3")),
            Ok(results_page("p1", 2, Some(2))),
            Err(TransportError::HttpStatus(500)),
        ]);
        let events: Vec<_> = scraper(factory).scrape_year("12", "03", "2019", "A").collect().await;

        assert_eq!(
            kinds(&events),
            vec!["info", "info", "info", "info", "info", "data", "error"]
        );
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::Error(PortalError::Pagination { page: 2, .. }))
        ));
    }

    #[tokio::test]
    async fn test_empty_results_still_finish() {
        let factory = CannedFactory::new(vec![
            Ok(form_page("v0")),
            Ok(delta("v1")),
            Ok(delta("v2")),
            Ok(delta("v3")),
            Ok(results_page("v4", 0, None)),
        ]);
        let events: Vec<_> = scraper(factory).scrape_year("12", "03", "2019", "A").collect().await;

        assert_eq!(
            &events[5..],
            &[
                ProgressEvent::Data {
                    year: "2019".to_string(),
                    page: 1,
                    count: 0,
                    records: Vec::<PropertyRecord>::new(),
                },
                ProgressEvent::Done {
                    year: "2019".to_string(),
                    total: 0
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_delta_keeps_previous_tokens() {
        let factory = CannedFactory::new(vec![
            Ok(form_page("v0")),
            Ok("zz|hiddenField|__VIEWSTATE|junk|".to_string()),
            Ok(delta("v2")),
            Ok(delta("v3")),
            Ok(results_page("v4", 0, None)),
        ]);
        let sent = Arc::clone(&factory.sent);
        let events: Vec<_> = scraper(factory).scrape_year("12", "03", "2019", "A").collect().await;
        assert!(matches!(events.last(), Some(ProgressEvent::Done { .. })));

        let sent = sent.lock().unwrap();
        let office_form = &sent[2].1;
        let vs = office_form.iter().find(|(k, _)| *k == VIEW_STATE).map(|(_, v)| v.as_str());
        assert_eq!(vs, Some("v0"));
    }

    #[tokio::test]
    async fn test_session_released_when_stream_is_abandoned() {
        let factory = CannedFactory::new(two_page_replies());
        let opened = Arc::clone(&factory.opened);
        let released = Arc::clone(&factory.released);
        let portal = scraper(factory);

        let mut events = portal.scrape_year("12", "03", "2019", "A");
        assert_eq!(*opened.lock().unwrap(), 0);

        let first = events.next().await;
        assert!(matches!(first, Some(ProgressEvent::Info { .. })));
        let second = events.next().await;
        assert!(matches!(second, Some(ProgressEvent::Info { .. })));
        assert_eq!(*opened.lock().unwrap(), 1);
        assert_eq!(released.load(Ordering::SeqCst), 0);

        drop(events);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_session_released_after_done() {
        let factory = CannedFactory::new(two_page_replies());
        let released = Arc::clone(&factory.released);
        let mut events = scraper(factory).scrape_year("12", "03", "2019", "A");

        let mut last = None;
        while let Some(event) = events.next().await {
            last = Some(event);
        }
        assert!(matches!(last, Some(ProgressEvent::Done { total: 8, .. })));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_session_released_after_error() {
        let factory = CannedFactory::new(vec![
            Ok(form_page("v0")),
            Ok(delta("v1")),
            Ok(delta("v2")),
            Ok(delta("v3")),
            Ok("<html><body>Session expired</body></html>".to_string()),
        ]);
        let released = Arc::clone(&factory.released);
        let mut events = scraper(factory).scrape_year("12", "03", "2019", "A");

        let mut last = None;
        while let Some(event) = events.next().await {
            last = Some(event);
        }
        assert!(matches!(
            last,
            Some(ProgressEvent::Error(PortalError::Parse { step: Step::Submit, .. }))
        ));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_delay_before_every_postback() {
        let factory = CannedFactory::new(two_page_replies());
        let sent_at = Arc::clone(&factory.sent_at);
        let config = ScraperConfig::default();
        assert_eq!(config.step_delay, Duration::from_secs(2));
        let portal = PortalScraper::with_factory(factory, config);

        let start = Instant::now();
        let events: Vec<_> = portal.scrape_year("12", "03", "2019", "A").collect().await;
        assert!(matches!(events.last(), Some(ProgressEvent::Done { total: 8, .. })));

        // Form load at once, then 2 s before each of three selections, the
        // search and the one page turn.
        let offsets: Vec<u64> = sent_at
            .lock()
            .unwrap()
            .iter()
            .map(|at| at.duration_since(start).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 2, 4, 6, 8, 10]);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_results_delivered_as_delta() {
        let factory = CannedFactory::new(vec![
            Ok(form_page("v0")),
            Ok(delta("v1")),
            Ok(delta("v2")),
            Ok(delta("v3")),
            Ok(results_delta("v4", 2)),
        ]);
        let events: Vec<_> = scraper(factory).scrape_year("12", "03", "2019", "A").collect().await;

        match &events[5] {
            ProgressEvent::Data { count, records, .. } => {
                assert_eq!(*count, 2);
                assert_eq!(records[0].village, "r0");
                assert_eq!(records[1].market_value, "r12");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Done {
                year: "2019".to_string(),
                total: 2
            })
        );
    }
}
