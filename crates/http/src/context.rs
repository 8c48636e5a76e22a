use crate::request::Request;
use crate::response::Response;

/// The request and response of one exchange, owned together.
///
/// A connection turns into a `RequestContext` once the request header is parsed.
/// The context lives until the handler returns, after which nothing may refer to
/// either half anymore.
#[derive(Debug)]
pub struct RequestContext {
    request: Request,
    response: Response,
}

impl RequestContext {
    pub(crate) fn new(request: Request, response: Response) -> Self {
        Self { request, response }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Both halves at once, as handlers receive them.
    pub fn parts_mut(&mut self) -> (&mut Request, &mut Response) {
        (&mut self.request, &mut self.response)
    }

    pub fn into_parts(self) -> (Request, Response) {
        (self.request, self.response)
    }
}
