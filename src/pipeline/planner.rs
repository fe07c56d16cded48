//! Short-horizon route planner.
//!
//! Follows a preconfigured waypoint route: target speed is the cruise value
//! (tapered on approach to the final waypoint), target steering is the
//! bearing error toward the current waypoint normalized by the full-lock
//! steering angle. The only state carried across ticks is the monotonically
//! advancing waypoint index plus the last seen position and heading; given
//! identical inputs the output is identical.

use crate::config::PlannerConfig;
use crate::types::{Plan, Position};

/// Minimum travel (m) between position samples before the direction of
/// motion is trusted as a heading estimate.
const MIN_HEADING_TRAVEL: f64 = 0.05;

/// Route-following planner
pub struct RoutePlanner {
    cfg: PlannerConfig,
    /// Index of the waypoint currently being tracked; advances only forward
    waypoint_index: usize,
    /// Last known position in the local frame (x, y)
    position: Option<(f64, f64)>,
    /// Current heading estimate in radians (0 = east)
    heading: Option<f64>,
    /// All waypoints reached
    complete: bool,
}

impl RoutePlanner {
    /// Create a planner over the configured route
    pub fn new(cfg: PlannerConfig) -> Self {
        if cfg.route.is_empty() {
            log::warn!("no route configured, planner will hold the vehicle stopped");
        } else {
            log::info!(
                "route loaded: {} waypoints, cruise {:.1} m/s",
                cfg.route.len(),
                cfg.cruise_speed
            );
        }

        Self {
            cfg,
            waypoint_index: 0,
            position: None,
            heading: None,
            complete: false,
        }
    }

    /// Record a position fix. The local frame maps longitude to x and
    /// latitude to y, matching the simulator's flat test towns.
    pub fn update_position(&mut self, position: &Position) {
        let p = (position.longitude, position.latitude);

        if let Some(prev) = self.position {
            let (dx, dy) = (p.0 - prev.0, p.1 - prev.1);
            if dx.hypot(dy) >= MIN_HEADING_TRAVEL {
                self.heading = Some(dy.atan2(dx));
            }
        }

        self.position = Some(p);
    }

    /// Record an absolute heading (compass), which beats the estimate
    /// derived from consecutive positions.
    pub fn update_heading(&mut self, heading_rad: f64) {
        self.heading = Some(heading_rad);
    }

    /// All waypoints have been reached
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Produce the plan for the current state.
    ///
    /// With no route or no position fix the safe default is a full stop.
    pub fn plan(&mut self, source_timestamp_us: u64) -> Plan {
        let index = self.waypoint_index as u64;

        if self.cfg.route.is_empty() || self.complete {
            return Plan::halt(index, source_timestamp_us);
        }
        let pos = match self.position {
            Some(p) => p,
            None => return Plan::halt(index, source_timestamp_us),
        };

        // Advance past every waypoint already inside the arrival radius.
        while self.waypoint_index < self.cfg.route.len() {
            let wp = self.cfg.route[self.waypoint_index];
            if distance(pos, (wp[0], wp[1])) >= self.cfg.waypoint_radius {
                break;
            }
            log::info!(
                "reached waypoint {}/{} at ({:.1}, {:.1})",
                self.waypoint_index + 1,
                self.cfg.route.len(),
                wp[0],
                wp[1]
            );
            self.waypoint_index += 1;
        }

        if self.waypoint_index >= self.cfg.route.len() {
            log::info!("all waypoints reached, route complete");
            self.complete = true;
            return Plan::halt(self.waypoint_index as u64, source_timestamp_us);
        }

        let wp = self.cfg.route[self.waypoint_index];
        let (dx, dy) = (wp[0] - pos.0, wp[1] - pos.1);
        let dist = dx.hypot(dy);

        // Cruise, tapering linearly inside the slowdown radius of the last
        // waypoint so arrival is not a panic stop.
        let mut target_speed = self.cfg.cruise_speed;
        let last_leg = self.waypoint_index == self.cfg.route.len() - 1;
        if last_leg && self.cfg.slowdown_distance > 0.0 && dist < self.cfg.slowdown_distance {
            target_speed = self.cfg.cruise_speed * (dist / self.cfg.slowdown_distance);
        }

        // Bearing error, normalized by the full-lock angle. Until the first
        // heading estimate exists the vehicle is assumed nose-on.
        let bearing = dy.atan2(dx);
        let heading = self.heading.unwrap_or(bearing);
        let alpha = normalize_angle(bearing - heading);
        let target_steering = (alpha / self.cfg.max_steering_rad).clamp(-1.0, 1.0);

        log::trace!(
            "plan: wp {}/{} dist {:.1}m speed {:.1} steer {:.2}",
            self.waypoint_index + 1,
            self.cfg.route.len(),
            dist,
            target_speed,
            target_steering
        );

        Plan {
            target_speed,
            target_steering,
            waypoint_index: self.waypoint_index as u64,
            source_timestamp_us,
        }
    }
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    (b.0 - a.0).hypot(b.1 - a.1)
}

/// Normalize an angle to [-pi, pi].
#[inline]
fn normalize_angle(angle: f64) -> f64 {
    angle.sin().atan2(angle.cos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn at(x: f64, y: f64) -> Position {
        Position {
            latitude: y,
            longitude: x,
            altitude: 0.0,
        }
    }

    fn planner_with_route(route: Vec<[f64; 2]>) -> RoutePlanner {
        RoutePlanner::new(PlannerConfig {
            route,
            ..PlannerConfig::default()
        })
    }

    #[test]
    fn no_route_yields_safe_default() {
        let mut planner = planner_with_route(vec![]);
        planner.update_position(&at(1.0, 2.0));

        let plan = planner.plan(5);

        assert_eq!(plan.target_speed, 0.0);
        assert_eq!(plan.target_steering, 0.0);
        assert_eq!(plan.source_timestamp_us, 5);
    }

    #[test]
    fn no_position_yields_safe_default() {
        let mut planner = planner_with_route(vec![[10.0, 0.0]]);

        let plan = planner.plan(1);

        assert_eq!(plan.target_speed, 0.0);
        assert_eq!(plan.target_steering, 0.0);
    }

    #[test]
    fn cruises_toward_distant_waypoint() {
        let mut planner = planner_with_route(vec![[100.0, 0.0]]);
        planner.update_position(&at(0.0, 0.0));

        let plan = planner.plan(1);

        assert_relative_eq!(plan.target_speed, PlannerConfig::default().cruise_speed);
        // Waypoint dead ahead of the assumed heading: no correction.
        assert_relative_eq!(plan.target_steering, 0.0);
    }

    #[test]
    fn steers_toward_offset_waypoint() {
        // Heading east, waypoint pulled to the left (+y).
        let mut left = planner_with_route(vec![[50.0, 50.0]]);
        left.update_heading(0.0);
        left.update_position(&at(0.0, 0.0));
        let plan = left.plan(1);

        assert!(plan.target_steering > 0.0);
        assert!(plan.target_steering <= 1.0);
    }

    #[test]
    fn steering_saturates_at_full_lock() {
        let mut planner = planner_with_route(vec![[-100.0, 0.0]]);
        planner.update_heading(0.0);
        planner.update_position(&at(0.0, 0.0));

        // Waypoint directly behind: bearing error pi, far past full lock.
        let plan = planner.plan(1);
        assert_relative_eq!(plan.target_steering.abs(), 1.0);
    }

    #[test]
    fn heading_follows_direction_of_travel() {
        let mut planner = planner_with_route(vec![[0.0, 100.0]]);
        planner.update_position(&at(0.0, 0.0));
        // Moving due north; waypoint due north: no correction expected.
        planner.update_position(&at(0.0, 10.0));

        let plan = planner.plan(1);
        assert_relative_eq!(plan.target_steering, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn waypoint_advances_inside_arrival_radius() {
        let mut planner = planner_with_route(vec![[10.0, 0.0], [20.0, 0.0]]);
        planner.update_position(&at(0.0, 0.0));
        assert_eq!(planner.plan(1).waypoint_index, 0);

        // Within the default 2 m radius of the first waypoint.
        planner.update_position(&at(9.0, 0.0));
        assert_eq!(planner.plan(2).waypoint_index, 1);

        // The index never moves backwards.
        planner.update_position(&at(0.0, 0.0));
        assert_eq!(planner.plan(3).waypoint_index, 1);
    }

    #[test]
    fn route_completion_stops_the_vehicle() {
        let mut planner = planner_with_route(vec![[5.0, 0.0]]);
        planner.update_position(&at(4.5, 0.0));

        let plan = planner.plan(1);

        assert!(planner.is_complete());
        assert_eq!(plan.target_speed, 0.0);
        assert_eq!(plan.target_steering, 0.0);

        // Completion is sticky even if the vehicle drifts away.
        planner.update_position(&at(30.0, 0.0));
        assert_eq!(planner.plan(2).target_speed, 0.0);
    }

    #[test]
    fn speed_tapers_near_final_waypoint() {
        let cfg = PlannerConfig::default();
        let mut planner = planner_with_route(vec![[5.0, 0.0]]);
        planner.update_position(&at(0.0, 0.0));

        let plan = planner.plan(1);

        // 5 m out with a 10 m slowdown radius: half cruise.
        assert_relative_eq!(plan.target_speed, cfg.cruise_speed * 0.5);
        assert!(plan.target_speed > 0.0);
    }

    #[test]
    fn identical_inputs_give_identical_plans() {
        let make = || {
            let mut p = planner_with_route(vec![[50.0, 20.0], [80.0, 20.0]]);
            p.update_position(&at(1.0, 2.0));
            p.update_position(&at(3.0, 2.5));
            p.plan(42)
        };

        assert_eq!(make(), make());
    }
}
