// Some varied usage examples.

use chrono::Local;
use tempo::{FuncJob, Scheduler};

fn main() -> Result<(), Box<dyn std::error::Error>> {
	let mut scheduler = Scheduler::new();

	scheduler.set_result_handler(|result| {
		if let Some(error) = &result.error {
			eprintln!("{} failed: {error}", result.job_id);
		} else {
			println!("{} finished: {}", result.job_id, result.message);
		}
	});

	scheduler.add_fn("@every 2s", || {
		Ok(format!("heartbeat at {}", Local::now().format("%H:%M:%S")))
	})?;

	scheduler.add_job(
		"@every 5s",
		FuncJob::with_id("flaky", || Err("wires crossed".into())),
	)?;

	scheduler.add_job(
		"0 * * * * *",
		FuncJob::with_id("minute-mark", || Ok("top of the minute".to_string())),
	)?;

	// `run` holds the scheduler for the loop's lifetime, so stop it
	// through a handle taken up front.
	let handle = scheduler.handle();
	std::thread::spawn(move || {
		std::thread::sleep(std::time::Duration::from_secs(65));
		handle.stop();
	});

	println!("Starting at {}, running for about a minute", Local::now());
	scheduler.run();
	println!("Stopped at {}", Local::now());
	Ok(())
}
