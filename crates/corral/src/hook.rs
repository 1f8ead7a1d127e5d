//! Lifecycle hooks
//!
//! Models keep ordered pre/post hook lists per operation. Synchronous hooks
//! run in registration order and the first error aborts the operation;
//! detached hooks are spawned fire-and-forget and their errors are logged
//! and dropped.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bson::Bson;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::warn;

use crate::Result;

/// Operations a hook can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Create,
    CreateMany,
    Find,
    FindOne,
    FindOneAndUpdate,
    FindOneAndDelete,
    FindOneAndReplace,
    Update,
    UpdateMany,
    Delete,
    DeleteMany,
    Count,
    Save,
    Validate,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Create => "create",
            Op::CreateMany => "createMany",
            Op::Find => "find",
            Op::FindOne => "findOne",
            Op::FindOneAndUpdate => "findOneAndUpdate",
            Op::FindOneAndDelete => "findOneAndDelete",
            Op::FindOneAndReplace => "findOneAndReplace",
            Op::Update => "update",
            Op::UpdateMany => "updateMany",
            Op::Delete => "delete",
            Op::DeleteMany => "deleteMany",
            Op::Count => "count",
            Op::Save => "save",
            Op::Validate => "validate",
        }
    }

    pub fn parse(name: &str) -> Option<Op> {
        match name {
            "create" => Some(Op::Create),
            "createMany" => Some(Op::CreateMany),
            "find" => Some(Op::Find),
            "findOne" => Some(Op::FindOne),
            "findOneAndUpdate" => Some(Op::FindOneAndUpdate),
            "findOneAndDelete" => Some(Op::FindOneAndDelete),
            "findOneAndReplace" => Some(Op::FindOneAndReplace),
            "update" => Some(Op::Update),
            "updateMany" => Some(Op::UpdateMany),
            "delete" => Some(Op::Delete),
            "deleteMany" => Some(Op::DeleteMany),
            "count" => Some(Op::Count),
            "save" => Some(Op::Save),
            "validate" => Some(Op::Validate),
            _ => None,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments handed to a hook callback: operation-dependent BSON payloads
/// such as the filter document.
pub type HookArgs = Vec<Bson>;

/// A registered hook callback.
pub type HookFn = Arc<dyn Fn(HookArgs) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Adapts a plain async closure into a [`HookFn`].
pub fn hook_fn<F, Fut>(f: F) -> HookFn
where
    F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}

#[derive(Clone)]
pub(crate) struct Hook {
    pub(crate) op: Op,
    pub(crate) func: HookFn,
    pub(crate) detached: bool,
}

/// Splits a pipe-delimited registration string into operations. Unknown
/// names are skipped with a warning.
pub(crate) fn parse_ops(names: &str) -> Vec<Op> {
    names
        .split('|')
        .filter_map(|name| {
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            match Op::parse(name) {
                Some(op) => Some(op),
                None => {
                    warn!(name, "ignoring hook registration for unknown operation");
                    None
                }
            }
        })
        .collect()
}

/// Runs the hooks registered for `op` in registration order. Detached hooks
/// are spawned and forgotten; synchronous hooks short-circuit on the first
/// error.
pub(crate) async fn run_hooks(hooks: &[Hook], op: Op, args: &[Bson]) -> Result<()> {
    for hook in hooks.iter().filter(|h| h.op == op) {
        if hook.detached {
            let func = Arc::clone(&hook.func);
            let args = args.to_vec();
            tokio::spawn(async move {
                if let Err(err) = func(args).await {
                    warn!(op = op.as_str(), error = %err, "detached hook failed; error dropped");
                }
            });
        } else {
            (hook.func)(args.to_vec()).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_hook(counter: Arc<AtomicUsize>) -> HookFn {
        hook_fn(move |_args| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    fn failing_hook(message: &'static str) -> HookFn {
        hook_fn(move |_args| async move { Err(Error::Internal(message.to_string())) })
    }

    #[test]
    fn test_op_string_round_trip() {
        for op in [
            Op::Create,
            Op::CreateMany,
            Op::Find,
            Op::FindOne,
            Op::FindOneAndUpdate,
            Op::FindOneAndDelete,
            Op::FindOneAndReplace,
            Op::Update,
            Op::UpdateMany,
            Op::Delete,
            Op::DeleteMany,
            Op::Count,
            Op::Save,
            Op::Validate,
        ] {
            assert_eq!(Op::parse(op.as_str()), Some(op));
        }
        assert_eq!(Op::parse("rename"), None);
    }

    #[test]
    fn test_parse_ops_fans_out_pipe_delimited_names() {
        let ops = parse_ops("find|count|findOne");
        assert_eq!(ops, vec![Op::Find, Op::Count, Op::FindOne]);
    }

    #[test]
    fn test_parse_ops_skips_unknown_and_empty_segments() {
        let ops = parse_ops("find||bogus|delete");
        assert_eq!(ops, vec![Op::Find, Op::Delete]);
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut hooks = Vec::new();
        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            hooks.push(Hook {
                op: Op::Create,
                func: hook_fn(move |_args| {
                    let order = Arc::clone(&order);
                    async move {
                        order.lock().unwrap().push(tag);
                        Ok(())
                    }
                }),
                detached: false,
            });
        }

        run_hooks(&hooks, Op::Create, &[]).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_first_error_short_circuits_remaining_hooks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hooks = vec![
            Hook {
                op: Op::Update,
                func: failing_hook("first hook failed"),
                detached: false,
            },
            Hook {
                op: Op::Update,
                func: counting_hook(Arc::clone(&calls)),
                detached: false,
            },
        ];

        let err = run_hooks(&hooks, Op::Update, &[]).await.unwrap_err();
        assert!(err.to_string().contains("first hook failed"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_only_matching_ops_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hooks = vec![Hook {
            op: Op::Delete,
            func: counting_hook(Arc::clone(&calls)),
            detached: false,
        }];

        run_hooks(&hooks, Op::Find, &[]).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        run_hooks(&hooks, Op::Delete, &[]).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_detached_hook_error_does_not_propagate() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let hooks = vec![Hook {
            op: Op::Save,
            func: hook_fn(move |_args| {
                let tx = tx.clone();
                async move {
                    tx.send(()).ok();
                    Err(Error::Internal("detached failure".to_string()))
                }
            }),
            detached: true,
        }];

        // The dispatcher reports success even though the hook fails.
        run_hooks(&hooks, Op::Save, &[]).await.unwrap();
        // The hook did run on the detached task.
        rx.recv().await.expect("detached hook ran");
    }
}
