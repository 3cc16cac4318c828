use discbot_core::timebase::{
    BaseTime, Handle, Reschedule, SlotState, Timebase, TimebaseError, TimeoutHandler,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Job {
    Blink,
    Once,
    Spawner,
    Spawned,
}

#[derive(Default)]
struct Recorder {
    runs: Vec<(u32, Job)>,
    spawned: Option<Handle>,
}

impl<const N: usize> TimeoutHandler<Job, N> for Recorder {
    fn on_timeout(&mut self, job: Job, timebase: &mut Timebase<Job, N>) -> Reschedule {
        self.runs.push((timebase.time_ms(), job));
        match job {
            Job::Blink => Reschedule::After(100),
            Job::Once | Job::Spawned => Reschedule::Cancel,
            Job::Spawner => {
                self.spawned = timebase.register(Job::Spawned, 50).ok();
                Reschedule::Cancel
            }
        }
    }
}

fn run(timebase: &mut Timebase<Job, 4>, recorder: &mut Recorder, ticks: usize) {
    for _ in 0..ticks {
        timebase.tick(recorder);
    }
}

#[test]
fn periodic_task_fires_on_its_third_tick() {
    let mut timebase = Timebase::<Job, 4>::new();
    timebase.init(BaseTime::Ms50, 4).unwrap();
    let mut recorder = Recorder::default();

    let handle = timebase.register(Job::Blink, 150).unwrap();
    assert_eq!(handle.get(), 1);

    run(&mut timebase, &mut recorder, 2);
    assert!(recorder.runs.is_empty());

    run(&mut timebase, &mut recorder, 1);
    assert_eq!(recorder.runs, [(150, Job::Blink)]);

    // The handler shortened the period to two ticks.
    run(&mut timebase, &mut recorder, 2);
    assert_eq!(recorder.runs, [(150, Job::Blink), (250, Job::Blink)]);
}

#[test]
fn one_shot_runs_once_and_frees_its_slot() {
    let mut timebase = Timebase::<Job, 4>::new();
    timebase.init(BaseTime::Ms100, 2).unwrap();
    let mut recorder = Recorder::default();

    let first = timebase.register(Job::Once, 100).unwrap();
    run(&mut timebase, &mut recorder, 5);
    assert_eq!(recorder.runs, [(100, Job::Once)]);
    assert_eq!(timebase.live_count(), 0);
    assert_eq!(timebase.occupied().count(), 0);

    assert_eq!(timebase.register(Job::Once, 100).unwrap(), first);
}

#[test]
fn registration_failures_leave_table_untouched() {
    let mut timebase = Timebase::<Job, 4>::new();
    assert_eq!(
        timebase.register(Job::Blink, 100),
        Err(TimebaseError::NotInitialized)
    );

    timebase.init(BaseTime::Ms20, 1).unwrap();
    assert_eq!(
        timebase.register(Job::Blink, 30),
        Err(TimebaseError::InvalidPeriod)
    );
    assert_eq!(
        timebase.register(Job::Blink, 0),
        Err(TimebaseError::InvalidPeriod)
    );
    timebase.register(Job::Blink, 40).unwrap();
    assert_eq!(
        timebase.register(Job::Once, 40),
        Err(TimebaseError::TableFull)
    );
    assert_eq!(timebase.live_count(), 1);
}

#[test]
fn stopped_task_keeps_its_progress() {
    let mut timebase = Timebase::<Job, 4>::new();
    timebase.init(BaseTime::Ms10, 4).unwrap();
    let mut recorder = Recorder::default();

    let handle = timebase.register(Job::Once, 40).unwrap();
    run(&mut timebase, &mut recorder, 2);
    timebase.stop_timeout(handle).unwrap();
    run(&mut timebase, &mut recorder, 10);
    assert!(recorder.runs.is_empty());

    timebase.start_timeout(handle).unwrap();
    run(&mut timebase, &mut recorder, 2);
    assert_eq!(recorder.runs, [(140, Job::Once)]);
}

#[test]
fn unregistered_handle_is_invalid_until_reused() {
    let mut timebase = Timebase::<Job, 4>::new();
    timebase.init(BaseTime::Ms10, 4).unwrap();
    let mut recorder = Recorder::default();

    let handle = timebase.register(Job::Blink, 10).unwrap();
    timebase.unregister(handle).unwrap();
    assert_eq!(
        timebase.unregister(handle),
        Err(TimebaseError::InvalidHandle)
    );
    assert_eq!(
        timebase.occupied().next().map(|slot| slot.state),
        Some(SlotState::PendingUnregister)
    );

    run(&mut timebase, &mut recorder, 3);
    assert!(recorder.runs.is_empty());
    assert_eq!(timebase.occupied().count(), 0);
}

#[test]
fn task_spawned_from_handler_starts_next_tick() {
    let mut timebase = Timebase::<Job, 4>::new();
    timebase.init(BaseTime::Ms50, 4).unwrap();
    let mut recorder = Recorder::default();

    timebase.register(Job::Spawner, 50).unwrap();
    run(&mut timebase, &mut recorder, 1);
    let spawned = recorder.spawned.unwrap();
    assert_eq!(spawned.get(), 2);

    run(&mut timebase, &mut recorder, 1);
    assert_eq!(
        recorder.runs,
        [(50, Job::Spawner), (100, Job::Spawned)]
    );
}
