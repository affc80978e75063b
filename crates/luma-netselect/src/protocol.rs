//! Endpoint paths, protocol versions and request parameter names.

pub const PATH_PREFIX: &str = "/internal/select/";

pub const QUERY_PROTOCOL_VERSION: &str = "v1";
pub const FIELD_NAMES_PROTOCOL_VERSION: &str = "v1";
pub const FIELD_VALUES_PROTOCOL_VERSION: &str = "v1";
pub const STREAM_FIELD_NAMES_PROTOCOL_VERSION: &str = "v1";
pub const STREAM_FIELD_VALUES_PROTOCOL_VERSION: &str = "v1";
pub const STREAMS_PROTOCOL_VERSION: &str = "v1";
pub const STREAM_IDS_PROTOCOL_VERSION: &str = "v1";

pub const PARAM_VERSION: &str = "version";
pub const PARAM_TENANT_IDS: &str = "tenant_ids";
pub const PARAM_QUERY: &str = "query";
pub const PARAM_TIMESTAMP: &str = "timestamp";
pub const PARAM_DISABLE_COMPRESSION: &str = "disable_compression";
pub const PARAM_FIELD: &str = "field";
pub const PARAM_LIMIT: &str = "limit";

pub const CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Query,
    FieldNames,
    FieldValues,
    StreamFieldNames,
    StreamFieldValues,
    Streams,
    StreamIds,
}

impl Endpoint {
    pub const ALL: [Endpoint; 7] = [
        Endpoint::Query,
        Endpoint::FieldNames,
        Endpoint::FieldValues,
        Endpoint::StreamFieldNames,
        Endpoint::StreamFieldValues,
        Endpoint::Streams,
        Endpoint::StreamIds,
    ];

    /// Last path segment, e.g. `field_values`.
    pub fn name(self) -> &'static str {
        match self {
            Endpoint::Query => "query",
            Endpoint::FieldNames => "field_names",
            Endpoint::FieldValues => "field_values",
            Endpoint::StreamFieldNames => "stream_field_names",
            Endpoint::StreamFieldValues => "stream_field_values",
            Endpoint::Streams => "streams",
            Endpoint::StreamIds => "stream_ids",
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Query => "/internal/select/query",
            Endpoint::FieldNames => "/internal/select/field_names",
            Endpoint::FieldValues => "/internal/select/field_values",
            Endpoint::StreamFieldNames => "/internal/select/stream_field_names",
            Endpoint::StreamFieldValues => "/internal/select/stream_field_values",
            Endpoint::Streams => "/internal/select/streams",
            Endpoint::StreamIds => "/internal/select/stream_ids",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.name() == name)
    }

    pub fn protocol_version(self) -> &'static str {
        match self {
            Endpoint::Query => QUERY_PROTOCOL_VERSION,
            Endpoint::FieldNames => FIELD_NAMES_PROTOCOL_VERSION,
            Endpoint::FieldValues => FIELD_VALUES_PROTOCOL_VERSION,
            Endpoint::StreamFieldNames => STREAM_FIELD_NAMES_PROTOCOL_VERSION,
            Endpoint::StreamFieldValues => STREAM_FIELD_VALUES_PROTOCOL_VERSION,
            Endpoint::Streams => STREAMS_PROTOCOL_VERSION,
            Endpoint::StreamIds => STREAM_IDS_PROTOCOL_VERSION,
        }
    }

    /// True for the streaming frame shape; every other endpoint answers
    /// with a single value-list blob.
    pub fn is_streaming(self) -> bool {
        self == Endpoint::Query
    }
}
