use std::{collections::HashMap, future::Future, sync::Arc};

use tokio::{
	sync::Semaphore,
	task::{Id, JoinError, JoinSet},
};

/// Run `f` over `items` with at most `parallel` calls in flight.
///
/// Items start in input order; they may finish in any order. A failing item
/// does not stop the others: every item runs and the first error observed is
/// returned at the end. A panicking task is turned into an error by
/// `on_panic`, which gets the index of the item in `items`. `parallel` below
/// 1 is treated as 1.
pub async fn run_in_parallel<T, F, Fut, P, E>(
	items: Vec<T>,
	parallel: usize,
	f: F,
	mut on_panic: P,
) -> Result<(), E>
where
	T: Send + 'static,
	F: Fn(T) -> Fut,
	Fut: Future<Output = Result<(), E>> + Send + 'static,
	P: FnMut(usize, JoinError) -> E,
	E: Send + 'static,
{
	let semaphore = Arc::new(Semaphore::new(parallel.max(1)));
	let mut join_set = JoinSet::new();
	let mut tasks: HashMap<Id, usize> = HashMap::with_capacity(items.len());
	let mut first_error = None;

	let mut record =
		|tasks: &HashMap<Id, usize>, result: Result<Result<(), E>, JoinError>| {
			let err = match result {
				Ok(Ok(())) => return,
				Ok(Err(e)) => e,
				Err(join_err) => {
					let index = tasks.get(&join_err.id()).copied().unwrap_or_default();
					on_panic(index, join_err)
				}
			};
			if first_error.is_none() {
				first_error = Some(err);
			}
		};

	for (index, item) in items.into_iter().enumerate() {
		// Taking the permit before spawning keeps dispatch in input order.
		// The semaphore is never closed, so the permit is always present.
		let permit = semaphore.clone().acquire_owned().await.ok();
		let fut = f(item);
		let handle = join_set.spawn(async move {
			let _permit = permit;
			fut.await
		});
		tasks.insert(handle.id(), index);
		while let Some(result) = join_set.try_join_next() {
			record(&tasks, result);
		}
	}

	while let Some(result) = join_set.join_next().await {
		record(&tasks, result);
	}

	match first_error {
		Some(e) => Err(e),
		None => Ok(()),
	}
}

#[cfg(test)]
mod tests {
	use std::{
		sync::{
			atomic::{AtomicUsize, Ordering},
			Mutex,
		},
		time::Duration,
	};

	use assert_matches::assert_matches;
	use rstest::rstest;

	use super::*;

	#[derive(Debug, PartialEq, Eq)]
	enum TestError {
		Failed(usize),
		Panicked(usize),
	}

	fn panicked(index: usize, _: JoinError) -> TestError {
		TestError::Panicked(index)
	}

	#[rstest]
	#[case::sequential(1)]
	#[case::bounded(3)]
	#[case::zero_means_one(0)]
	#[tokio::test]
	async fn test_respects_limit(#[case] parallel: usize) {
		let in_flight = Arc::new(AtomicUsize::new(0));
		let max_seen = Arc::new(AtomicUsize::new(0));

		let result: Result<(), TestError> = run_in_parallel((0..20).collect(), parallel, |_| {
			let in_flight = in_flight.clone();
			let max_seen = max_seen.clone();
			async move {
				let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
				max_seen.fetch_max(now, Ordering::SeqCst);
				tokio::time::sleep(Duration::from_millis(2)).await;
				in_flight.fetch_sub(1, Ordering::SeqCst);
				Ok(())
			}
		}, panicked)
		.await;

		assert_matches!(result, Ok(()));
		assert!(max_seen.load(Ordering::SeqCst) <= parallel.max(1));
	}

	#[tokio::test]
	async fn test_dispatch_order_follows_input() {
		let started = Arc::new(Mutex::new(Vec::new()));
		let result: Result<(), TestError> = run_in_parallel((0..10).collect(), 1, |i| {
			let started = started.clone();
			async move {
				started.lock().unwrap().push(i);
				Ok(())
			}
		}, panicked)
		.await;
		assert_matches!(result, Ok(()));
		assert_eq!(*started.lock().unwrap(), (0..10).collect::<Vec<_>>());
	}

	#[tokio::test]
	async fn test_errors_do_not_stop_siblings() {
		let done = Arc::new(AtomicUsize::new(0));
		let result = run_in_parallel((0..10).collect(), 1, |i| {
			let done = done.clone();
			async move {
				done.fetch_add(1, Ordering::SeqCst);
				if i == 3 || i == 7 {
					Err(TestError::Failed(i))
				} else {
					Ok(())
				}
			}
		}, panicked)
		.await;
		assert_eq!(result, Err(TestError::Failed(3)));
		assert_eq!(done.load(Ordering::SeqCst), 10);
	}

	#[tokio::test]
	async fn test_panic_becomes_error() {
		let result = run_in_parallel(vec![1usize, 2, 3], 2, |i| async move {
			if i == 2 {
				panic!("boom");
			}
			Ok::<(), TestError>(())
		}, panicked)
		.await;
		assert_eq!(result, Err(TestError::Panicked(1)));
	}
}
