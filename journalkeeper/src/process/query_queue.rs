use super::*;

pub struct Query {
    pub message: Bytes,
    pub completion: Completion,
}

pub struct Inner {
    app: Ref<App>,
    q: spin::Mutex<Impl>,
}

#[derive(shrinkwraprs::Shrinkwrap, Clone)]
pub struct QueryQueue(Arc<Inner>);
impl QueryQueue {
    pub fn new(app: Ref<App>) -> Self {
        let inner = Inner {
            app,
            q: Impl::new().into(),
        };
        Self(Arc::new(inner))
    }

    /// Register a query to run once `lastApplied` reaches `read_index`
    /// (the commit index of when the query arrived). This is what keeps
    /// reads linearizable without writing to the log.
    pub fn register(&self, read_index: Index, query: Query) {
        let mut q = self.q.lock();
        q.register(read_index, query);
    }

    /// Execute awaiting queries in `[, index]` in parallel.
    pub fn execute(&self, index: Index) -> bool {
        let mut q = self.q.lock();
        q.execute(index, &self.app)
    }
}

pub struct Impl {
    reserved: BTreeMap<Index, Vec<Query>>,
}

impl Impl {
    fn new() -> Self {
        Self {
            reserved: BTreeMap::new(),
        }
    }

    fn register(&mut self, read_index: Index, query: Query) {
        self.reserved
            .entry(read_index)
            .or_insert(vec![])
            .push(query);
    }

    fn execute(&mut self, index: Index, app: &App) -> bool {
        let runnable = {
            let mut out = vec![];
            let ls: Vec<Index> = self.reserved.range(..=index).map(|(k, _)| *k).collect();
            for idx in ls {
                if let Some(queries) = self.reserved.remove(&idx) {
                    for query in queries {
                        out.push((query, app.clone()));
                    }
                }
            }
            out
        };

        if runnable.is_empty() {
            return false;
        }

        for (Query { message, completion }, app) in runnable {
            tokio::spawn(async move {
                // The completion of a failed query is dropped, which just
                // results in failing on the client side.
                if let Ok(resp) = app.query(&message).await {
                    completion.settle(Some(resp));
                }
            });
        }

        true
    }
}
