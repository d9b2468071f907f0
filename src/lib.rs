#![forbid(unsafe_code)]
#![doc = r#"
lke-relay

Relay chat requests and image uploads to the Tencent Cloud LKE bot platform.

Crate highlights
- Chat relay: forwards a JSON chat payload to the vendor SSE endpoint and re-emits every
  non-empty event as `data: <payload>\n\n`; failures become a single `{"error": ...}` frame.
- Upload relay: requests temporary storage credentials (`DescribeStorageCredential`), writes
  the file to COS and returns `{"success": true, "imageUrl", "cosPath"}`.
- Two adapters over one core: actix-web routes (`server`) and a framework-free
  `http::Request` handler (`serverless`).

Modules
- `config`: `RelayConfig`, built once at startup (defaults, YAML file, environment).
- `sse`: upstream event parsing and outbound framing.
- `chat`: chat relay core.
- `cloud_api`: TC3-signed control-plane client.
- `cos`: object-storage writes with temporary credentials.
- `upload`: upload relay core and multipart extraction.
- `server`: Actix-web routes (used by the `lke-relay` binary).
- `serverless`: raw handler adapter.
- `util`: Shared helpers (tracing, HTTP client, CORS, error responses).
"#]

pub mod chat;
pub mod cloud_api;
pub mod config;
pub mod cos;
pub mod server;
pub mod serverless;
pub mod sse;
pub mod upload;
pub mod util;

pub use crate::chat::{parse_chat_payload, relay_chat, ChatError};
pub use crate::cloud_api::{
    CloudApiClient, CloudApiError, StorageCredentialRequest, TemporaryCredentials,
};
pub use crate::config::{ConfigError, RelayConfig};
pub use crate::cos::{put_object, CosError};
pub use crate::sse::{error_frame, relay_frames, SseEvent, SseEventStream};
pub use crate::upload::{
    file_extension, handle_upload, read_upload_form, relay_upload, UploadError, UploadResult,
    UploadedFile,
};
pub use crate::util::AppState;
