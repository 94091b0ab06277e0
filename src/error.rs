use thiserror::Error;

/// 卡通图片管线的错误分类。
///
/// Everything up to and including the local write is fatal for the
/// generation feature; the remaining variants each degrade exactly one
/// optional field of the result bundle.
#[derive(Debug, Error)]
pub enum CartoonError {
    #[error("远程生成服务调用失败: {0}")]
    RemoteGeneration(String),

    #[error("轮询任务超时 (task_id={task_id}, 共轮询 {attempts} 次)")]
    Timeout { task_id: String, attempts: u32 },

    #[error("下载卡通图片失败: {0}")]
    Download(String),

    #[error("本地文件保存失败: {0}")]
    FileStorage(String),

    #[error("上传对象存储失败: {0}")]
    ObjectStorage(String),

    #[error("生成预签名URL失败: {0}")]
    LinkIssuance(String),

    #[error("生成二维码失败: {0}")]
    Encoding(String),
}

impl CartoonError {
    /// Whether this error aborts the generation feature as a whole.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CartoonError::RemoteGeneration(_)
                | CartoonError::Timeout { .. }
                | CartoonError::Download(_)
                | CartoonError::FileStorage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(CartoonError::RemoteGeneration("x".into()).is_fatal());
        assert!(
            CartoonError::Timeout {
                task_id: "t".into(),
                attempts: 30
            }
            .is_fatal()
        );
        assert!(CartoonError::Download("x".into()).is_fatal());
        assert!(CartoonError::FileStorage("x".into()).is_fatal());
        assert!(!CartoonError::ObjectStorage("x".into()).is_fatal());
        assert!(!CartoonError::LinkIssuance("x".into()).is_fatal());
        assert!(!CartoonError::Encoding("x".into()).is_fatal());
    }
}
