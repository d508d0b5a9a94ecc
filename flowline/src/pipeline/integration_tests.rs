//! End-to-end tests for assembled pipelines.

#[cfg(test)]
mod tests {
    use crate::errors::PipelineError;
    use crate::item::Item;
    use crate::pipeline::Pipeline;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn words() -> Vec<String> {
        ["one", "of", "these", "things", "first"]
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    fn seven_words() -> Vec<String> {
        ["bland", "names", "for", "bland", "results", "seven", "words"]
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn test_upcase_transform_preserves_order() {
        let mut pipeline = Pipeline::setup(|b| b.upcase()).unwrap();
        let mut results = Vec::new();
        pipeline
            .run(words(), |item| results.extend(item.into_records()))
            .unwrap();
        assert_eq!(results, vec!["ONE", "OF", "THESE", "THINGS", "FIRST"]);
    }

    #[test]
    fn test_filter_rejects_apostrophes() {
        let input = ["I've", "got", "a", "match"].map(String::from);
        let mut pipeline =
            Pipeline::setup(|b| b.filter(|w: &String| !w.contains('\''))).unwrap();
        let mut results = Vec::new();
        pipeline
            .run(input, |item| results.extend(item.into_records()))
            .unwrap();
        assert_eq!(results, vec!["got", "a", "match"]);
    }

    #[test]
    fn test_order_matches_plain_filter_then_map() {
        let input: Vec<i32> = (1..=20).collect();
        let expected: Vec<i32> = input
            .iter()
            .copied()
            .filter(|n| n % 3 != 0)
            .map(|n| n * 10)
            .collect();

        let mut pipeline = Pipeline::setup(|b| {
            b.filter(|n: &i32| n % 3 != 0).transform(|n| Ok(n * 10))
        })
        .unwrap();
        let mut results = Vec::new();
        pipeline
            .run(input, |item| results.extend(item.into_records()))
            .unwrap();
        assert_eq!(results, expected);
    }

    #[test]
    fn test_gather_to_array_chunks_seven_words() {
        let mut pipeline = Pipeline::setup(|b| b.gather(3).to_array()).unwrap();
        let mut batches = Vec::new();
        pipeline
            .run(seven_words(), |item| match item {
                Item::Batch(values) => batches.push(values),
                other => panic!("expected a batch, got {other:?}"),
            })
            .unwrap();

        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        let flattened: Vec<String> = batches.into_iter().flatten().collect();
        assert_eq!(flattened, seven_words());
    }

    #[test]
    fn test_gather_scatter_round_trip() {
        for capacity in 1..=8 {
            let mut pipeline =
                Pipeline::setup(|b| b.gather(capacity).scatter()).unwrap();
            let mut results = Vec::new();
            pipeline
                .run(seven_words(), |item| results.extend(item.into_records()))
                .unwrap();
            assert_eq!(results, seven_words(), "capacity {capacity}");
        }
    }

    #[test]
    fn test_take_while_delivers_longest_satisfying_prefix() {
        let input = vec![1, 2, 3, 42, 4, 5];
        let mut pipeline = Pipeline::setup(|b| b.take_while(|n: &i32| *n < 10)).unwrap();
        let mut results = Vec::new();
        pipeline
            .run(input, |item| results.extend(item.into_records()))
            .unwrap();
        // 4 and 5 satisfy the predicate but come after the first failure.
        assert_eq!(results, vec![1, 2, 3]);
    }

    #[test]
    fn test_identity_chain_is_a_no_op() {
        let input: Vec<i32> = (0..50).collect();
        let mut pipeline =
            Pipeline::setup(|b| b.filter(|_: &i32| true).transform(Ok)).unwrap();
        let mut results = Vec::new();
        pipeline
            .run(input.clone(), |item| results.extend(item.into_records()))
            .unwrap();
        assert_eq!(results, input);
    }

    #[test]
    fn test_one_poisoned_record_is_isolated() {
        let failures = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&failures);

        let mut pipeline = Pipeline::setup(|b| {
            b.transform_named("reject-marked", |w: String| {
                if w == "poison" {
                    anyhow::bail!("marked record")
                }
                Ok(w)
            })
        })
        .unwrap()
        .with_error_handler(move |last, err| {
            sink.borrow_mut().push((last.cloned(), err.to_string()));
        });

        let input = ["a", "b", "poison", "c", "d"].map(String::from);
        let mut results = Vec::new();
        let report = pipeline
            .run(input, |item| results.extend(item.into_records()))
            .unwrap();

        assert_eq!(results, vec!["a", "b", "c", "d"]);
        assert_eq!(report.delivered, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(failures.borrow().len(), 1);
        assert_eq!(failures.borrow()[0].0, Some("poison".to_string()));

        // A fresh equivalent pipeline over a clean sequence delivers all.
        let mut pipeline = Pipeline::setup(|b| {
            b.transform_named("reject-marked", |w: String| {
                if w == "poison" {
                    anyhow::bail!("marked record")
                }
                Ok(w)
            })
        })
        .unwrap();
        let mut results = Vec::new();
        let report = pipeline
            .run(words(), |item| results.extend(item.into_records()))
            .unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_batch_member_failure_keeps_the_surviving_members() {
        let failures = Rc::new(RefCell::new(0u32));
        let count = Rc::clone(&failures);

        let mut pipeline = Pipeline::setup(|b| {
            b.gather(3).transform(|n: i32| {
                if n == 2 {
                    anyhow::bail!("bad record")
                }
                Ok(n)
            })
        })
        .unwrap()
        .with_error_handler(move |_, _| *count.borrow_mut() += 1);

        let mut results = Vec::new();
        let report = pipeline
            .run(vec![1, 2, 3, 4, 5, 6], |item| {
                results.extend(item.into_records());
            })
            .unwrap();

        // Only the failing member is lost, not its whole batch.
        assert_eq!(results, vec![1, 3, 4, 5, 6]);
        assert_eq!(report.failed, 1);
        assert_eq!(*failures.borrow(), 1);
    }

    #[test]
    fn test_unhandled_record_failures_are_logged() {
        use std::io;
        use std::sync::{Arc, Mutex};

        #[derive(Clone, Default)]
        struct Capture(Arc<Mutex<Vec<u8>>>);

        impl io::Write for Capture {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Capture {
            type Writer = Self;
            fn make_writer(&'a self) -> Self {
                self.clone()
            }
        }

        let capture = Capture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(capture.clone())
            .finish();

        let mut pipeline = Pipeline::setup(|b| {
            b.transform(|w: String| {
                if w == "poison" {
                    anyhow::bail!("marked record")
                }
                Ok(w)
            })
        })
        .unwrap();

        let mut results = Vec::new();
        tracing::subscriber::with_default(subscriber, || {
            pipeline
                .run(["a", "poison", "b"].map(String::from), |item| {
                    results.extend(item.into_records());
                })
                .unwrap();
        });

        let logs = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("skipping record"));
        assert!(logs.contains("marked record"));
        assert_eq!(results, vec!["a", "b"]);
    }

    #[test]
    fn test_failure_upstream_of_gather_leaves_buffer_coherent() {
        let mut pipeline = Pipeline::setup(|b| {
            b.transform(|n: i32| {
                if n == 3 {
                    anyhow::bail!("bad record")
                }
                Ok(n)
            })
            .gather(2)
        })
        .unwrap()
        .with_error_handler(|_, _| {});

        let mut batches = Vec::new();
        let report = pipeline
            .run(vec![1, 2, 3, 4, 5], |item| batches.push(item.into_records()))
            .unwrap();

        assert_eq!(batches, vec![vec![1, 2], vec![4, 5]]);
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn test_pipeline_reuse_resets_stage_state() {
        let mut pipeline = Pipeline::setup(|b| b.gather(4)).unwrap();

        let mut first = Vec::new();
        pipeline
            .run(vec![1, 2, 3], |item| first.push(item.into_records()))
            .unwrap();
        assert_eq!(first, vec![vec![1, 2, 3]]);

        // A stale buffer would leak records from the first run here.
        let mut second = Vec::new();
        pipeline
            .run(vec![9, 8], |item| second.push(item.into_records()))
            .unwrap();
        assert_eq!(second, vec![vec![9, 8]]);
    }

    #[test]
    fn test_finish_hooks_run_for_every_stage_despite_failures() {
        use crate::stages::Stage;

        let finished = Rc::new(RefCell::new(Vec::new()));
        let first = Rc::clone(&finished);
        let second = Rc::clone(&finished);

        let mut pipeline = Pipeline::<i32>::setup(|b| {
            b.stage(Stage::transform("a", Ok).with_finish(move || {
                first.borrow_mut().push("a");
                anyhow::bail!("teardown failed")
            }))
            .stage(Stage::transform("b", Ok).with_finish(move || {
                second.borrow_mut().push("b");
                Ok(())
            }))
        })
        .unwrap();

        pipeline.run(vec![1], |_| {}).unwrap();
        assert_eq!(*finished.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn test_peek_observes_without_altering_the_stream() {
        let seen = Rc::new(RefCell::new(0u32));
        let counter = Rc::clone(&seen);
        let mut pipeline = Pipeline::setup(|b| {
            b.peek(move |_: &String| {
                *counter.borrow_mut() += 1;
                Ok(())
            })
            .upcase()
        })
        .unwrap();
        let mut results = Vec::new();
        pipeline
            .run(words(), |item| results.extend(item.into_records()))
            .unwrap();
        assert_eq!(*seen.borrow(), 5);
        assert_eq!(results, vec!["ONE", "OF", "THESE", "THINGS", "FIRST"]);
    }

    #[test]
    fn test_non_blank_drops_null_and_empty_records() {
        let records = vec![
            json!({"id": "b1"}),
            json!(null),
            json!({}),
            json!({"id": "b2"}),
            json!(""),
        ];
        let mut pipeline = Pipeline::setup(|b| b.non_blank()).unwrap();
        let mut results = Vec::new();
        pipeline
            .run(records, |item| results.extend(item.into_records()))
            .unwrap();
        assert_eq!(results, vec![json!({"id": "b1"}), json!({"id": "b2"})]);
    }

    #[test]
    fn test_realistic_record_chain() {
        // Validate, normalize, enrich, and chunk JSON records the way
        // the indexing front end wires its collaborators in.
        let records = vec![
            json!({"id": "b001", "title": "first"}),
            json!(null),
            json!({"title": "missing id"}),
            json!({"id": "b002", "title": "second"}),
            json!({"id": "b003", "title": "third"}),
        ];

        let mut pipeline = Pipeline::setup(|b| {
            b.non_blank()
                .filter_named("has-id", |rec: &serde_json::Value| {
                    rec.get("id").is_some()
                })
                .transform_named("mark-enriched", |mut rec: serde_json::Value| {
                    rec.as_object_mut()
                        .ok_or_else(|| anyhow::anyhow!("record is not an object"))?
                        .insert("enriched".to_string(), json!(true));
                    Ok(rec)
                })
                .gather_named(2, "solr-chunks")
        })
        .unwrap();

        let mut batches = Vec::new();
        let report = pipeline
            .run(records, |item| batches.push(item.into_records()))
            .unwrap();

        assert_eq!(report.records_in, 5);
        assert_eq!(report.delivered, 2);
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1]);
        for rec in batches.into_iter().flatten() {
            assert_eq!(rec["enriched"], json!(true));
        }
    }

    #[test]
    fn test_error_handler_gets_no_record_before_first_pull() {
        // A start-time failure is fatal, not record-level; the handler
        // is never invoked for it.
        let called = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&called);

        use crate::stages::Stage;
        let mut pipeline = Pipeline::<i32>::setup(|b| {
            b.stage(Stage::transform("boom", Ok).with_start(|| anyhow::bail!("nope")))
        })
        .unwrap()
        .with_error_handler(move |_, _| *flag.borrow_mut() = true);

        let result = pipeline.run(vec![1], |_| {});
        assert!(matches!(result, Err(PipelineError::Start { .. })));
        assert!(!*called.borrow());
    }
}
