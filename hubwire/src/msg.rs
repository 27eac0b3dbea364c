use serde::{Deserialize, Serialize};

/// Addressing token for one logical connection of a transport.
///
/// Transports that serve many peers (a listener with several accepted
/// connections) tag every inbound frame with the session it came from, and the
/// router uses it to address the response. It never appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

/// RPC envelope shared by requests and responses.
///
/// `V` is the codec's deferred value type: arguments and results stay in that
/// form until the skeleton or the caller decodes them into concrete types.
///
/// On the wire the envelope is a record with short keys:
///
/// ```text
/// I: id | H: hub | M: method | A: arguments | R: results | E: error | T: stack trace
/// ```
///
/// A message carrying `A` is a request, anything else is a response.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Message<V> {
    /// Correlation id, unique among the calls pending on the sending router.
    #[serde(rename = "I", default)]
    pub id: String,
    /// Target service name. Responses are matched by `id` alone.
    #[serde(rename = "H", default, skip_serializing_if = "String::is_empty")]
    pub hub: String,
    #[serde(rename = "M", default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(rename = "A", default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<V>>,
    #[serde(rename = "R", default, skip_serializing_if = "Option::is_none")]
    pub results: Option<V>,
    #[serde(rename = "E", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "T", default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Attached by the router after decoding.
    #[serde(skip)]
    pub session: Option<SessionId>,
}

impl<V> Message<V> {
    /// Creates a request. The id is assigned by the router when it is sent.
    pub fn request(hub: impl Into<String>, method: impl Into<String>, arguments: Vec<V>) -> Self {
        Self {
            id: String::new(),
            hub: hub.into(),
            method: method.into(),
            arguments: Some(arguments),
            results: None,
            error: None,
            stack_trace: None,
            session: None,
        }
    }

    /// Creates a successful response to the request with the given id.
    pub fn success(id: String, results: V) -> Self {
        Self {
            id,
            hub: String::new(),
            method: String::new(),
            arguments: None,
            results: Some(results),
            error: None,
            stack_trace: None,
            session: None,
        }
    }

    /// Creates a failed response to the request with the given id.
    pub fn failure(id: String, error: String, stack_trace: Option<String>) -> Self {
        Self {
            id,
            hub: String::new(),
            method: String::new(),
            arguments: None,
            results: None,
            error: Some(error),
            stack_trace,
            session: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        if self.arguments.is_some() {
            MessageKind::Request
        } else {
            MessageKind::Response
        }
    }

    #[must_use]
    pub fn is_request(&self) -> bool {
        self.kind() == MessageKind::Request
    }

    /// Number of arguments carried by a request, zero for responses.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.arguments.as_ref().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn with_session(mut self, session: Option<SessionId>) -> Self {
        self.session = session;
        self
    }

    /// Splits a response into its outcome.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::Remote`](crate::ErrorKind::Remote) error when the
    /// response carries an error message.
    pub fn into_outcome(self) -> crate::Result<Option<V>> {
        match self.error {
            Some(error) => Err(crate::Error::remote(error, self.stack_trace)),
            None => Ok(self.results),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kind() {
        let req = Message::<u32>::request("Calculator", "add", vec![3, 4]);
        assert!(req.is_request());
        assert_eq!(req.arity(), 2);

        let req = Message::<u32>::request("Calculator", "reset", vec![]);
        assert_eq!(req.kind(), MessageKind::Request);
        assert_eq!(req.arity(), 0);

        let rsp = Message::success("B".into(), 7u32);
        assert_eq!(rsp.kind(), MessageKind::Response);
        assert_eq!(rsp.into_outcome(), Ok(Some(7)));
    }

    #[test]
    fn test_wire_keys() {
        let mut req = Message::request("Calculator", "add", vec![3, 4]);
        req.id = "B".into();
        req.session = Some(SessionId(9));
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"I":"B","H":"Calculator","M":"add","A":[3,4]}"#);

        let rsp = Message::<u32>::failure("B".into(), "boom".into(), Some("trace".into()));
        let json = serde_json::to_string(&rsp).unwrap();
        assert_eq!(json, r#"{"I":"B","E":"boom","T":"trace"}"#);

        let parsed: Message<u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.session, None);
        assert_eq!(parsed.kind(), MessageKind::Response);
        let err = parsed.into_outcome().unwrap_err();
        assert_eq!(err.msg, "boom");
        assert_eq!(err.remote_trace.as_deref(), Some("trace"));
    }
}
