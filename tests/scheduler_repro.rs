#[cfg(test)]
mod tests {
    use phase::scheduler::{Phase, Scheduler};

    fn say(line: &'static str) -> impl FnOnce(&mut Scheduler) -> anyhow::Result<()> {
        move |sched| {
            sched.emit(line);
            Ok(())
        }
    }

    #[test]
    fn self_rescheduling_immediate_does_not_starve_timers() {
        let mut sched = Scheduler::new();

        // 1. An immediate that re-arms itself twice.
        fn rearm(remaining: u32) -> Box<dyn FnOnce(&mut Scheduler) -> anyhow::Result<()>> {
            Box::new(move |sched| {
                sched.emit(format!("immediate {remaining}"));
                if remaining > 0 {
                    sched.set_immediate(rearm(remaining - 1));
                }
                Ok(())
            })
        }
        sched.set_immediate(rearm(2));

        // 2. A zero-delay timer armed from the first immediate's pass.
        sched.set_immediate(|sched| {
            sched.set_timeout(0, say("timer"))?;
            Ok(())
        });

        let report = sched.run().unwrap();
        println!("Trace: {:?}", report.output);

        // The re-armed immediate must wait a full pass, so the timer gets in first.
        assert_eq!(
            report.output,
            vec!["immediate 2", "timer", "immediate 1", "immediate 0"]
        );
        assert_eq!(report.passes, 3);
    }

    #[test]
    fn zero_delay_interval_yields_to_other_phases() {
        let mut sched = Scheduler::new();
        let mut count = 0_u32;
        sched
            .set_interval(0, move |sched| {
                count += 1;
                sched.emit(format!("interval {count}"));
                if count == 3 {
                    let id = sched
                        .current_interval()
                        .ok_or_else(|| anyhow::anyhow!("no active interval"))?;
                    sched.cancel(id);
                }
                Ok(())
            })
            .unwrap();
        sched.set_immediate(say("immediate"));

        let report = sched.run().unwrap();
        println!("Trace: {:?}", report.output);
        assert_eq!(
            report.output,
            vec!["interval 1", "immediate", "interval 2", "interval 3"]
        );
        assert_eq!(sched.timer_count(), 0);
    }

    #[test]
    fn cancelled_timer_does_not_drive_the_clock() {
        let mut sched = Scheduler::new();
        let far = sched.set_timeout(1_000, say("far")).unwrap();
        sched.set_timeout(10, say("near")).unwrap();
        assert!(sched.cancel(far));
        assert_eq!(sched.next_timer_deadline(), Some(10));

        let report = sched.run().unwrap();
        assert_eq!(report.output, vec!["near"]);
        assert_eq!(report.clock, 10);
        assert_eq!(sched.timer_count(), 0);
        assert_eq!(sched.pending_count(Phase::Timer), 0);
    }
}
