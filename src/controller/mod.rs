use crate::client::{ApiError, ListQuery, RestClient};
use crate::config::ResourceSpec;
use crate::list::{self, ClientFilter, Pager};
use crate::record::{Draft, ListPage, Record};

/// Per-resource lifecycle. Refetches go through `Loading`, mutations through
/// `Submitting`; both land on `Ready` or `Error`. There is no offline or
/// conflict state: last writer wins against the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Loading,
    Ready,
    Submitting,
    Error,
}

/// Handle for one issued load. Tickets carry a monotonically increasing
/// sequence number; only the latest issued ticket may apply its response, so
/// a slow early response can never overwrite a later one.
#[derive(Clone, Debug)]
pub struct LoadTicket {
    seq: u64,
    pub query: ListQuery,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied,
    Stale,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Removal {
    Deleted,
    Declined,
}

/// Owns the in-memory collection for exactly one resource. The collection
/// mirrors the server as of the last successful fetch and is never treated
/// as authoritative between fetches.
#[derive(Clone, Debug)]
pub struct ResourceController {
    client: RestClient,
    resource: ResourceSpec,
    pager: Pager,
    records: Vec<Record>,
    state: ControllerState,
    last_error: Option<String>,
    issued_seq: u64,
    page: usize,
    filter: ClientFilter,
    last_query: ListQuery,
    server_total_pages: Option<usize>,
}

impl ResourceController {
    pub fn new(client: RestClient, resource: ResourceSpec, page_size: usize) -> Self {
        Self {
            client,
            resource,
            pager: Pager::new(page_size),
            records: Vec::new(),
            state: ControllerState::Idle,
            last_error: None,
            issued_seq: 0,
            page: 1,
            filter: ClientFilter::default(),
            last_query: ListQuery::default(),
            server_total_pages: None,
        }
    }

    pub fn resource(&self) -> &ResourceSpec {
        &self.resource
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn begin_load(&mut self, query: ListQuery) -> LoadTicket {
        self.issued_seq += 1;
        self.state = ControllerState::Loading;
        LoadTicket {
            seq: self.issued_seq,
            query,
        }
    }

    /// Applies a load response. A stale ticket (one superseded by a later
    /// `begin_load`) is discarded outright. On failure the previous
    /// collection stays visible (stale-but-available beats a blanked view)
    /// and the error is handed back for surfacing.
    pub fn apply_load(
        &mut self,
        ticket: &LoadTicket,
        result: Result<ListPage, ApiError>,
    ) -> Result<LoadOutcome, ApiError> {
        if ticket.seq != self.issued_seq {
            log::debug!(
                "discarding stale load #{} for '{}' (latest is #{})",
                ticket.seq,
                self.resource.name,
                self.issued_seq
            );
            return Ok(LoadOutcome::Stale);
        }
        match result {
            Ok(page) => {
                self.records = page.records;
                self.server_total_pages = page.total_pages;
                self.last_query = ticket.query.clone();
                self.last_error = None;
                self.state = ControllerState::Ready;
                // Under server-side pagination the loaded collection is the
                // page the query asked for, even past the server's count;
                // clamping here would caption it with a different number.
                self.page = match ticket.query.page {
                    Some(requested) => requested.max(1),
                    None => self.clamped_page(self.page),
                };
                Ok(LoadOutcome::Applied)
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.state = ControllerState::Error;
                Err(e)
            }
        }
    }

    /// Fetches and replaces the collection. Safe to call at any time; when
    /// loads overlap, the one issued last wins regardless of completion
    /// order.
    pub async fn load(&mut self, query: ListQuery) -> Result<LoadOutcome, ApiError> {
        let ticket = self.begin_load(query);
        let result = self.client.list(&self.resource, &ticket.query).await;
        self.apply_load(&ticket, result)
    }

    fn validate(&mut self, draft: &Draft) -> Result<(), ApiError> {
        if let Err(missing) = draft.validate_required(&self.resource.required) {
            let err = ApiError::validation(&missing);
            self.last_error = Some(err.to_string());
            return Err(err);
        }
        Ok(())
    }

    async fn refetch(&mut self) {
        let query = self.last_query.clone();
        // Best effort: the mutation already succeeded, a failed refetch only
        // leaves the previous collection on screen.
        let _ = self.load(query).await;
    }

    /// Validates, POSTs, then refetches. A validation failure is reported
    /// before anything leaves the machine and the caller's draft stays
    /// intact for retry; so does a remote failure.
    pub async fn create(&mut self, draft: &Draft) -> Result<(), ApiError> {
        self.validate(draft)?;
        self.state = ControllerState::Submitting;
        match self.client.create(&self.resource, draft).await {
            Ok(_) => {
                self.refetch().await;
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.state = ControllerState::Error;
                Err(e)
            }
        }
    }

    /// Same as [`create`](Self::create) but PUT against the per-id endpoint.
    pub async fn update(&mut self, id: &str, draft: &Draft) -> Result<(), ApiError> {
        self.validate(draft)?;
        self.state = ControllerState::Submitting;
        match self.client.update(&self.resource, id, draft).await {
            Ok(_) => {
                self.refetch().await;
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.state = ControllerState::Error;
                Err(e)
            }
        }
    }

    /// Deletes by id, but only after the confirmation callback agrees.
    /// Declining issues no request and changes nothing.
    pub async fn remove<F>(&mut self, id: &str, confirm: F) -> Result<Removal, ApiError>
    where
        F: FnOnce() -> bool,
    {
        if !confirm() {
            return Ok(Removal::Declined);
        }
        self.state = ControllerState::Submitting;
        match self.client.remove(&self.resource, id).await {
            Ok(()) => {
                let id_field = self.resource.id_field.clone();
                self.records
                    .retain(|r| r.id(&id_field).as_deref() != Some(id));
                self.page = self.clamped_page(self.page);
                self.last_error = None;
                self.state = ControllerState::Ready;
                Ok(Removal::Deleted)
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.state = ControllerState::Error;
                Err(e)
            }
        }
    }

    /// An editable copy of the loaded record with the given id. Changes to
    /// the draft never touch the collection; only the remote update followed
    /// by a refetch does.
    pub fn draft_for(&self, id: &str) -> Option<Draft> {
        self.records
            .iter()
            .find(|r| r.id(&self.resource.id_field).as_deref() == Some(id))
            .map(Draft::from_record)
    }

    /// Replaces the client-side filter. With client pagination this snaps
    /// back to the first page; a server-assigned page stays put because the
    /// loaded collection still is that page.
    pub fn set_filter(&mut self, filter: ClientFilter) {
        self.filter = filter;
        if !self.server_paged() {
            self.page = 1;
        }
    }

    pub fn filter(&self) -> &ClientFilter {
        &self.filter
    }

    pub fn visible(&self) -> Vec<&Record> {
        list::apply(&self.records, &self.filter)
    }

    /// True once the server has paginated for us; the loaded collection is
    /// then a single page and its counts are authoritative.
    fn server_paged(&self) -> bool {
        self.server_total_pages.is_some() && self.last_query.page.is_some()
    }

    pub fn total_pages(&self) -> usize {
        if self.server_paged() {
            return self.server_total_pages.unwrap_or(1);
        }
        self.pager.total_pages(self.visible().len())
    }

    fn clamped_page(&self, page: usize) -> usize {
        if self.server_paged() {
            // The page number names the server slice already loaded; only
            // guard the lower bound.
            return page.max(1);
        }
        self.pager.clamp(page, self.visible().len())
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = self.clamped_page(page);
    }

    /// The records for the current page. Under server-side pagination the
    /// whole loaded collection already is the page.
    pub fn page_records(&self) -> Vec<&Record> {
        let visible = self.visible();
        if self.server_paged() {
            return visible;
        }
        self.pager.slice(&visible, self.page).to_vec()
    }
}
