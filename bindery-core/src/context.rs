//! The request being handled on the current thread.
//!
//! [`RequestContext::enter`] publishes the request and response for the
//! duration of a dispatch and returns a [`RequestScope`]. Dropping the scope
//! restores whatever was current before, so the context is cleared on every
//! exit path, early returns and unwinding panics included.
//!
//! ```
//! use bindery_core::context::RequestContext;
//! use bindery_core::http::{HttpRequest, HttpResponse};
//! use std::sync::Arc;
//!
//! assert!(RequestContext::current().is_none());
//! {
//!     let _scope = RequestContext::enter(
//!         Arc::new(HttpRequest::new("GET", "/ping")),
//!         Arc::new(HttpResponse::new()),
//!     );
//!     assert_eq!(RequestContext::current().unwrap().request().path, "/ping");
//! }
//! assert!(RequestContext::current().is_none());
//! ```

use crate::http::{HttpRequest, HttpResponse};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

thread_local! {
    static CURRENT: RefCell<Option<RequestContext>> = const { RefCell::new(None) };
}

/// Request and response of the dispatch running on this thread.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request: Arc<HttpRequest>,
    response: Arc<HttpResponse>,
}

impl RequestContext {
    /// Make `request` and `response` current until the scope is dropped.
    pub fn enter(request: Arc<HttpRequest>, response: Arc<HttpResponse>) -> RequestScope {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(RequestContext { request, response }));
        RequestScope {
            previous,
            _not_send: PhantomData,
        }
    }

    /// The context of the dispatch running on this thread, if any.
    pub fn current() -> Option<RequestContext> {
        CURRENT.with(|current| current.borrow().clone())
    }

    pub fn is_active() -> bool {
        CURRENT.with(|current| current.borrow().is_some())
    }

    pub fn request(&self) -> &Arc<HttpRequest> {
        &self.request
    }

    pub fn response(&self) -> &Arc<HttpResponse> {
        &self.response
    }
}

/// Guard returned by [`RequestContext::enter`].
///
/// Tied to the thread that created it.
#[must_use = "the request context is cleared as soon as the scope is dropped"]
#[derive(Debug)]
pub struct RequestScope {
    previous: Option<RequestContext>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(path: &str) -> RequestScope {
        RequestContext::enter(Arc::new(HttpRequest::new("GET", path)), Arc::new(HttpResponse::new()))
    }

    #[test]
    fn test_nested_scopes_restore() {
        let outer = scope("/outer");
        {
            let _inner = scope("/inner");
            assert_eq!(RequestContext::current().unwrap().request().path, "/inner");
        }
        assert_eq!(RequestContext::current().unwrap().request().path, "/outer");
        drop(outer);
        assert!(!RequestContext::is_active());
    }

    #[test]
    fn test_cleared_after_panic() {
        let result = std::panic::catch_unwind(|| {
            let _scope = scope("/boom");
            panic!("handler failed");
        });
        assert!(result.is_err());
        assert!(RequestContext::current().is_none());
    }

    #[test]
    fn test_thread_confined() {
        let _scope = scope("/main");
        let seen = std::thread::spawn(RequestContext::is_active).join().unwrap();
        assert!(!seen);
    }
}
