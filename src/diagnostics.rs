//! 诊断输出
//!
//! 两个可选回调：日志回调接收可读消息，跟踪回调接收失败操作的名称。
//! 两者互不依赖，未注册时只走 `tracing`。

use crate::utils::EspError;
use std::sync::{Arc, Mutex};

type Sink = Box<dyn Fn(&str) + Send>;

#[derive(Default)]
struct Sinks {
    log: Option<Sink>,
    trace: Option<Sink>,
}

/// 共享的诊断回调（注册表与其下所有集合共用一份）
#[derive(Clone, Default)]
pub struct Diagnostics {
    sinks: Arc<Mutex<Sinks>>,
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (log, trace) = match self.sinks.lock() {
            Ok(sinks) => (sinks.log.is_some(), sinks.trace.is_some()),
            Err(_) => (false, false),
        };
        f.debug_struct("Diagnostics").field("log", &log).field("trace", &trace).finish()
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册日志回调（`None` 取消注册）
    pub fn set_log_sink(&self, sink: Option<Box<dyn Fn(&str) + Send>>) {
        if let Ok(mut sinks) = self.sinks.lock() {
            sinks.log = sink;
        }
    }

    /// 注册跟踪回调（`None` 取消注册）
    pub fn set_trace_sink(&self, sink: Option<Box<dyn Fn(&str) + Send>>) {
        if let Ok(mut sinks) = self.sinks.lock() {
            sinks.trace = sink;
        }
    }

    /// 发送一条日志消息
    pub fn log(&self, message: &str) {
        tracing::info!("{}", message);
        if let Ok(sinks) = self.sinks.lock() {
            if let Some(sink) = &sinks.log {
                sink(message);
            }
        }
    }

    /// 报告失败的操作
    pub fn fail(&self, operation: &str, error: &EspError) {
        tracing::debug!("{} 失败 ({}): {}", operation, error.kind_name(), error);
        if let Ok(sinks) = self.sinks.lock() {
            if let Some(sink) = &sinks.log {
                sink(&format!("{}: {}", operation, error));
            }
            if let Some(sink) = &sinks.trace {
                sink(operation);
            }
        }
    }

    /// 把结果中的错误报告给回调，原样返回结果
    pub fn check<T>(&self, operation: &str, result: crate::utils::Result<T>) -> crate::utils::Result<T> {
        if let Err(error) = &result {
            self.fail(operation, error);
        }
        result
    }
}
