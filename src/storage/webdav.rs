use super::{OperatorSessionFactory, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::error::TransportError;
use opendal::{layers::TimeoutLayer, Operator};
use std::time::Duration;

/// 创建 WebDAV 会话工厂
pub async fn webdav_session_factory(
    endpoint: &str,
    username: &str,
    password: &str,
    root: Option<String>,
) -> Result<OperatorSessionFactory, TransportError> {
    use opendal::services::Webdav;

    let mut builder = Webdav::default()
        .endpoint(endpoint)
        .username(username)
        .password(password);

    if let Some(ref r) = root {
        builder = builder.root(r);
    }

    let operator = Operator::new(builder)?
        .layer(
            TimeoutLayer::default()
                .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
        )
        .finish();

    let name = format!(
        "webdav://{}{}",
        endpoint.trim_end_matches('/'),
        root.as_deref()
            .map(|r| format!("/{}", r.trim_start_matches('/')))
            .unwrap_or_default()
    );

    // 尝试创建根目录（某些 WebDAV 服务器需要）
    // 忽略错误，目录可能已存在或不需要创建
    let _ = operator.create_dir("/").await;

    Ok(OperatorSessionFactory::new(operator, name))
}
